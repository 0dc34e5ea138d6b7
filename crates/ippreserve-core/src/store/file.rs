// # File Record Store
//
// Reads preserved-IP records from a JSON file on disk.
//
// ## Accepted Formats
//
// Plain array:
//
// ```json
// [ { "instance_name": "vm-a", "private_ip": "10.1.2.5" } ]
// ```
//
// Wrapped document:
//
// ```json
// { "records": [ { "instance_name": "vm-a", "private_ip": "10.1.2.5" } ] }
// ```
//
// Full table scan export (typed attributes):
//
// ```json
// { "Items": [ { "InstanceName": { "S": "vm-a" }, "PrivateIp": { "S": "10.1.2.5" } } ],
//   "Count": 1, "ScannedCount": 1 }
// ```
//
// The file is read when `list_records()` is first polled, never at
// construction, and is never written.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::Error;
use crate::traits::record_store::{PreservedIpRecord, RecordStore, RecordStream};

/// Records buffered between the reader task and the consumer
const RECORD_CHANNEL_CAPACITY: usize = 64;

/// File-based record store
///
/// # Example
///
/// ```rust,no_run
/// use ippreserve_core::store::FileRecordStore;
/// use ippreserve_core::traits::RecordStore;
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileRecordStore::new("/var/lib/ippreserve/records.json");
///
///     let mut records = store.list_records();
///     while let Some(record) = records.next().await {
///         let record = record?;
///         println!("{} -> {}", record.instance_name, record.private_ip);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    /// Create a store reading from `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_items(path: &Path) -> Result<Vec<Value>, Error> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::store_unavailable(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let document: Value = serde_json::from_str(&content).map_err(|e| {
            Error::store_unavailable(format!("{} is not valid JSON: {}", path.display(), e))
        })?;

        match document {
            Value::Array(items) => Ok(items),
            Value::Object(mut root) => {
                let items = root.remove("Items").or_else(|| root.remove("records"));
                match items {
                    Some(Value::Array(items)) => Ok(items),
                    _ => Err(Error::store_unavailable(format!(
                        "{} has neither an \"Items\" nor a \"records\" array",
                        path.display()
                    ))),
                }
            }
            _ => Err(Error::store_unavailable(format!(
                "{} does not contain a list of records",
                path.display()
            ))),
        }
    }
}

impl RecordStore for FileRecordStore {
    fn list_records(&self) -> RecordStream {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let path = self.path.clone();

        tokio::spawn(async move {
            let items = match Self::load_items(&path).await {
                Ok(items) => items,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            tracing::debug!("Scanning {} record(s) from {}", items.len(), path.display());

            for (index, item) in items.into_iter().enumerate() {
                let record = serde_json::from_value::<PreservedIpRecord>(item).map_err(|e| {
                    Error::store_unavailable(format!(
                        "Record #{} in {} is malformed: {}",
                        index,
                        path.display(),
                        e
                    ))
                });
                let failed = record.is_err();

                // Consumer dropped the stream
                if tx.send(record).await.is_err() || failed {
                    return;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn store_name(&self) -> &'static str {
        "file"
    }
}
