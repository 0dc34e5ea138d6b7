//! Core traits for the IP preservation system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`RecordStore`]: Read preserved `instance_name -> private_ip` records
//! - [`PlatformDirectory`]: Resolve VM and subnet names on the target platform
//! - [`VmSpecApi`]: Read and replace VM specifications

pub mod platform;
pub mod record_store;

pub use platform::{PlatformDirectory, SubnetHandle, UpdateAccepted, VmHandle, VmSpecApi};
pub use record_store::{PreservedIpRecord, RecordStore, RecordStream};
