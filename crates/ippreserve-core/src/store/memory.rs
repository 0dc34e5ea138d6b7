// # Memory Record Store
//
// In-memory implementation of RecordStore.
//
// ## When to Use
//
// - Testing environments
// - Records supplied inline in configuration

use std::sync::{Arc, RwLock};

use crate::Error;
use crate::traits::record_store::{PreservedIpRecord, RecordStore, RecordStream};

/// In-memory record store
///
/// Records are yielded in insertion order.
///
/// # Example
///
/// ```rust,no_run
/// use ippreserve_core::store::MemoryRecordStore;
/// use ippreserve_core::traits::{PreservedIpRecord, RecordStore};
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRecordStore::new();
///     store.insert(PreservedIpRecord::new("vm-a", "10.1.2.5"));
///
///     let records: Vec<_> = store.list_records().collect().await;
///     assert_eq!(records.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<Vec<PreservedIpRecord>>>,
}

impl MemoryRecordStore {
    /// Create a new empty memory record store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`
    pub fn with_records(records: impl IntoIterator<Item = PreservedIpRecord>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(records.into_iter().collect())),
        }
    }

    /// Append a record
    pub fn insert(&self, record: PreservedIpRecord) {
        if let Ok(mut guard) = self.inner.write() {
            guard.push(record);
        }
    }

    /// Get the number of records in the store
    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn list_records(&self) -> RecordStream {
        let snapshot: Vec<Result<PreservedIpRecord, Error>> = match self.inner.read() {
            Ok(guard) => guard.iter().cloned().map(Ok).collect(),
            Err(_) => vec![Err(Error::store_unavailable("memory record store lock poisoned"))],
        };
        Box::pin(tokio_stream::iter(snapshot))
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
