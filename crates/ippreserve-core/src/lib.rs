// # ippreserve-core
//
// Core library for re-homing migrated VMs onto a target subnet while keeping
// each VM's original private IP.
//
// ## Architecture Overview
//
// - **RecordStore**: Trait for reading the `instance_name -> private_ip` records
// - **PlatformDirectory**: Trait for resolving VM and subnet names to identifiers
// - **VmSpecApi**: Trait for full-representation reads and writes of a VM
// - **VmSpecMutator**: Read-modify-write of a VM's NIC list
// - **Orchestrator**: Per-record state machine (resolve → clear → wait → attach)
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from platform clients
// 2. **Fresh Reads**: Every write is preceded by a read; nothing is cached
// 3. **Explicit Configuration**: No ambient state; config objects are passed in
// 4. **Library-First**: The binary only wires configuration to these types
// 5. **Surface, Don't Guess**: Ambiguous names and duplicate records are reported, not resolved

pub mod config;
pub mod error;
pub mod mutator;
pub mod orchestrator;
pub mod store;
pub mod traits;
pub mod vm_spec;

// Re-export core types for convenience
pub use config::{
    IpPreserveConfig, OrchestratorConfig, PlatformConfig, RecordStoreConfig, VmMatchStrategy,
};
pub use error::{Error, Result};
pub use mutator::{MutationResult, VmSpecMutator};
pub use orchestrator::{
    Orchestrator, OrchestratorEvent, RecordOutcome, RecordReport, RecordState, RunReport,
};
pub use store::{DynamoDbRecordStore, FileRecordStore, MemoryRecordStore};
pub use traits::{
    PlatformDirectory, PreservedIpRecord, RecordStore, RecordStream, SubnetHandle,
    UpdateAccepted, VmHandle, VmSpecApi,
};
pub use vm_spec::{NicDescriptor, VmSpecification, VmUpdatePayload};
