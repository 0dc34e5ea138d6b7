//! VM Spec Mutator
//!
//! Every mutation follows the same read-modify-write protocol:
//!
//! 1. Fetch the current [`VmSpecification`] (always fresh, never cached)
//! 2. Apply the transformation to `spec.resources.nic_list`
//! 3. Build the write body with [`VmSpecification::into_update_payload`],
//!    which drops `status`
//! 4. Submit the full representation; only an accepted update is success
//!
//! The platform's update API replaces the whole resource, so skipping step 1
//! would clobber fields this workflow does not own (categories, power state).
//! `metadata.spec_version` travels unchanged, letting the platform refuse a
//! write based on a stale read.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::traits::VmSpecApi;
use crate::vm_spec::{NicDescriptor, VmSpecification, VmUpdatePayload};

/// Result of a single mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResult {
    /// The platform accepted the update
    Submitted {
        /// Platform task applying the update, if reported
        task_id: Option<String>,
    },
    /// The specification already had the requested shape; nothing was written
    Unchanged,
    /// Dry-run mode: the update was logged, not submitted
    DryRun,
}

/// Applies NIC transformations to VM specifications
#[derive(Clone)]
pub struct VmSpecMutator {
    api: Arc<dyn VmSpecApi>,
    dry_run: bool,
}

impl VmSpecMutator {
    /// Create a mutator on top of a platform VM API
    pub fn new(api: Arc<dyn VmSpecApi>, dry_run: bool) -> Self {
        Self { api, dry_run }
    }

    /// Whether writes are suppressed
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Fetch the current specification without modifying it
    pub async fn observe(&self, vm_id: &str) -> Result<VmSpecification> {
        self.api.get_vm(vm_id).await
    }

    /// Replace the VM's NIC list with an empty one
    pub async fn clear_all_nics(&self, vm_id: &str) -> Result<MutationResult> {
        let mut spec = self.api.get_vm(vm_id).await?;
        let removed = spec.desired_nic_list().len();

        spec.clear_nics();

        debug!("Clearing {} NIC(s) from VM {}", removed, vm_id);
        self.submit(vm_id, spec.into_update_payload(), "clear NICs")
            .await
    }

    /// Append a NIC on `subnet_id` with `static_ip` to the VM's NIC list
    ///
    /// The list is not required to be empty; callers clear it first. If an
    /// identical NIC is already requested nothing is written, so repeating an
    /// attach whose response was lost does not add a second NIC.
    pub async fn attach_nic(
        &self,
        vm_id: &str,
        subnet_id: &str,
        static_ip: &str,
    ) -> Result<MutationResult> {
        let mut spec = self.api.get_vm(vm_id).await?;
        let nic = NicDescriptor::with_static_ip(subnet_id, static_ip);

        if spec.has_nic(&nic) {
            info!(
                "VM {} already has a NIC on subnet {} with IP {}",
                vm_id, subnet_id, static_ip
            );
            return Ok(MutationResult::Unchanged);
        }

        spec.push_nic(&nic);

        self.submit(vm_id, spec.into_update_payload(), "attach NIC")
            .await
    }

    async fn submit(
        &self,
        vm_id: &str,
        payload: VmUpdatePayload,
        action: &str,
    ) -> Result<MutationResult> {
        if self.dry_run {
            info!(
                "[DRY-RUN] Would {} on VM {} via {} with payload: {}",
                action,
                vm_id,
                self.api.platform_name(),
                payload.as_value()
            );
            return Ok(MutationResult::DryRun);
        }

        let accepted = self.api.update_vm(vm_id, &payload).await?;
        info!(
            "Platform accepted {} on VM {} (task: {})",
            action,
            vm_id,
            accepted.task_id.as_deref().unwrap_or("none")
        );
        Ok(MutationResult::Submitted {
            task_id: accepted.task_id,
        })
    }
}

impl std::fmt::Debug for VmSpecMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmSpecMutator")
            .field("platform", &self.api.platform_name())
            .field("dry_run", &self.dry_run)
            .finish()
    }
}
