// # Platform Traits
//
// Interfaces to the target virtualization platform's control API.
//
// - `PlatformDirectory`: resolve VM and subnet names to platform identifiers
// - `VmSpecApi`: read and fully replace a VM's specification
//
// ## Implementations
//
// - Prism Central v3 style API: `ippreserve-prism` crate
//
// ## Trust Level: Untrusted
//
// Platform clients execute exactly one logical API operation per call and
// classify the response. They do not retry, sleep, or cache: retry with
// backoff and convergence polling are owned by the `Orchestrator`.
//
// Not-found is a value (`Ok(None)` / empty `Vec`), never an error.

use async_trait::async_trait;

use crate::vm_spec::{VmSpecification, VmUpdatePayload};

/// A VM on the target platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmHandle {
    /// Platform identifier (uuid)
    pub id: String,
    /// VM name
    pub name: String,
}

impl VmHandle {
    /// Create a new VM handle
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A subnet on the target platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubnetHandle {
    /// Platform identifier (uuid)
    pub id: String,
    /// Subnet name
    pub name: String,
}

impl SubnetHandle {
    /// Create a new subnet handle
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Acknowledgement of an asynchronously accepted update
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateAccepted {
    /// Platform task tracking the update, when the platform reports one
    pub task_id: Option<String>,
}

/// Name resolution against the platform
///
/// # Errors
///
/// - `Error::PlatformUnavailable` for transport failures and 5xx/429 answers
/// - `Error::Authentication` when credentials are refused
#[async_trait]
pub trait PlatformDirectory: Send + Sync {
    /// Every VM whose name equals `name` exactly, in platform listing order
    ///
    /// The full VM listing is scanned; server-side name filtering is not
    /// relied upon.
    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<VmHandle>, crate::Error>;

    /// First VM whose name equals `name`, if any
    async fn find_vm_by_name(&self, name: &str) -> Result<Option<VmHandle>, crate::Error> {
        Ok(self.find_vms_by_name(name).await?.into_iter().next())
    }

    /// Subnet named `name` (server-side equality filter, first result)
    async fn find_subnet_by_name(&self, name: &str) -> Result<Option<SubnetHandle>, crate::Error>;
}

/// Full-representation read and write of a VM
///
/// # Errors
///
/// In addition to the directory errors:
/// - `Error::VmNotFound` if the id is unknown
/// - `Error::Conflict` if the platform refuses a stale write
/// - `Error::Rejected` for any other refused write, carrying the response body
#[async_trait]
pub trait VmSpecApi: Send + Sync {
    /// Fetch the current full specification of a VM
    async fn get_vm(&self, vm_id: &str) -> Result<VmSpecification, crate::Error>;

    /// Submit a full specification; `Ok` only for an accepted update
    async fn update_vm(
        &self,
        vm_id: &str,
        payload: &VmUpdatePayload,
    ) -> Result<UpdateAccepted, crate::Error>;

    /// Platform name (for logging/debugging)
    fn platform_name(&self) -> &'static str;
}
