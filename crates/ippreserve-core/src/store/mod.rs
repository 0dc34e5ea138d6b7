// # Record Store Implementations
//
// This module provides implementations of the RecordStore trait for
// the supported record sources.

pub mod dynamodb;
pub mod file;
pub mod memory;

pub use dynamodb::DynamoDbRecordStore;
pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

use crate::config::RecordStoreConfig;
use crate::traits::RecordStore;

/// Build the record store described by `config`
pub fn from_config(config: &RecordStoreConfig) -> Box<dyn RecordStore> {
    match config {
        RecordStoreConfig::File { path } => Box::new(FileRecordStore::new(path)),
        RecordStoreConfig::DynamoDb { table, region } => {
            Box::new(DynamoDbRecordStore::new(table, region.clone()))
        }
        RecordStoreConfig::Inline { records } => {
            Box::new(MemoryRecordStore::with_records(records.iter().cloned()))
        }
    }
}
