// # Record Store Trait
//
// Read-only access to the durable `instance_name -> private_ip` mapping
// written by the earlier migration stage.
//
// ## Implementations
//
// - In-memory: `MemoryRecordStore`
// - JSON file / table scan export: `FileRecordStore`
// - DynamoDB table scan: `DynamoDbRecordStore`
//
// ## Usage
//
// ```rust,ignore
// use ippreserve_core::RecordStore;
// use tokio_stream::StreamExt;
//
// let mut records = store.list_records();
// while let Some(record) = records.next().await {
//     let record = record?;
//     println!("{} -> {}", record.instance_name, record.private_ip);
// }
// ```

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// One migrated VM and the private IP it must keep
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawRecord")]
pub struct PreservedIpRecord {
    /// Name of the source instance, expected to equal the target VM name
    pub instance_name: String,
    /// Previously assigned private IP
    pub private_ip: String,
}

impl PreservedIpRecord {
    /// Create a new record
    pub fn new(instance_name: impl Into<String>, private_ip: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            private_ip: private_ip.into(),
        }
    }
}

/// Accepts snake_case fields, the source table's attribute names, and the
/// typed attribute shape (`{"S": "..."}`) of a table scan export.
#[derive(Deserialize)]
struct RawRecord {
    #[serde(alias = "InstanceName")]
    instance_name: AttributeValue,
    #[serde(alias = "PrivateIp")]
    private_ip: AttributeValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AttributeValue {
    Plain(String),
    Typed {
        #[serde(rename = "S")]
        s: String,
    },
}

impl From<AttributeValue> for String {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Plain(s) | AttributeValue::Typed { s } => s,
        }
    }
}

impl From<RawRecord> for PreservedIpRecord {
    fn from(raw: RawRecord) -> Self {
        Self {
            instance_name: raw.instance_name.into(),
            private_ip: raw.private_ip.into(),
        }
    }
}

/// Lazily produced sequence of records
///
/// An `Err` item means the scan failed; consumers stop at the first error.
pub type RecordStream =
    Pin<Box<dyn Stream<Item = Result<PreservedIpRecord, crate::Error>> + Send + 'static>>;

/// Trait for preserved-IP record store implementations
///
/// # Contract
///
/// - `list_records()` performs a full scan and yields every record once
/// - An empty store yields an empty stream, not an error
/// - Scan failures are yielded as `Error::StoreUnavailable`
/// - Implementations never write to the backing store
pub trait RecordStore: Send + Sync {
    /// Scan the whole store
    fn list_records(&self) -> RecordStream;

    /// Name of the backing store (for logging)
    fn store_name(&self) -> &'static str;
}
