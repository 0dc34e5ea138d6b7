// # DynamoDB Record Store
//
// Scans the table written by the migration stage that recorded each
// instance's private IP. Items carry the attributes `InstanceName` and
// `PrivateIp` (string type); snake_case names are accepted too.
//
// ## Scan Behavior
//
// - The scan is paginated by the SDK (`LastEvaluatedKey`); items are
//   forwarded as each page arrives, so the table size is not bounded by memory
// - Any SDK failure is yielded as `Error::StoreUnavailable` and ends the scan
// - The client is built when `list_records()` is first polled, using the
//   standard AWS credential chain; an explicit region overrides the
//   environment's
//
// ## Usage
//
// ```rust,ignore
// use ippreserve_core::store::DynamoDbRecordStore;
//
// let store = DynamoDbRecordStore::new(
//     "ec2-to-nc2-ip-preservation",
//     Some("ap-northeast-1".to_string()),
// );
// let mut records = store.list_records();
// ```

use std::collections::HashMap;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::Error;
use crate::traits::record_store::{PreservedIpRecord, RecordStore, RecordStream};

/// Records buffered between the scan task and the consumer
const RECORD_CHANNEL_CAPACITY: usize = 64;

/// Record store backed by a DynamoDB table scan
#[derive(Clone)]
pub struct DynamoDbRecordStore {
    table: String,
    region: Option<String>,
    client: Option<Client>,
}

impl DynamoDbRecordStore {
    /// Create a store scanning `table`, optionally pinned to `region`
    pub fn new(table: impl Into<String>, region: Option<String>) -> Self {
        Self {
            table: table.into(),
            region,
            client: None,
        }
    }

    /// Create a store that scans `table` with an already configured client
    pub fn with_client(client: Client, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            region: None,
            client: Some(client),
        }
    }

    /// Name of the scanned table
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn client(region: Option<String>) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        Client::new(&loader.load().await)
    }
}

/// Map one scanned item onto a record
///
/// Only string attributes are considered; a missing `InstanceName` or
/// `PrivateIp` makes the item malformed.
pub(crate) fn record_from_item(
    item: HashMap<String, AttributeValue>,
) -> Result<PreservedIpRecord, serde_json::Error> {
    let fields: Map<String, Value> = item
        .into_iter()
        .filter_map(|(name, value)| match value {
            AttributeValue::S(s) => Some((name, Value::String(s))),
            _ => None,
        })
        .collect();

    serde_json::from_value(Value::Object(fields))
}

impl RecordStore for DynamoDbRecordStore {
    fn list_records(&self) -> RecordStream {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let table = self.table.clone();
        let region = self.region.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let client = match client {
                Some(client) => client,
                None => Self::client(region).await,
            };

            let mut items = client
                .scan()
                .table_name(&table)
                .into_paginator()
                .items()
                .send();

            let mut scanned = 0usize;
            while let Some(item) = items.next().await {
                let record = match item {
                    Ok(item) => record_from_item(item).map_err(|e| {
                        Error::store_unavailable(format!(
                            "Item #{} in table {} is malformed: {}",
                            scanned, table, e
                        ))
                    }),
                    Err(e) => Err(Error::store_unavailable(format!(
                        "Scan of table {} failed: {}",
                        table,
                        DisplayErrorContext(&e)
                    ))),
                };
                let failed = record.is_err();
                scanned += 1;

                // Consumer dropped the stream
                if tx.send(record).await.is_err() || failed {
                    return;
                }
            }

            tracing::debug!("Scanned {} item(s) from table {}", scanned, table);
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn store_name(&self) -> &'static str {
        "dynamodb"
    }
}

impl std::fmt::Debug for DynamoDbRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbRecordStore")
            .field("table", &self.table)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
