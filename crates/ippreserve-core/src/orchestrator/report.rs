//! Per-record outcomes and the aggregated run report

use chrono::{DateTime, Utc};
use std::fmt;

use crate::traits::{PreservedIpRecord, SubnetHandle};

/// Progress of a single record through the reconfiguration state machine
///
/// ```text
/// Pending → VmResolved → NicsCleared → NicAttached
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Record read, VM not yet looked up
    Pending,
    /// VM found; its NICs are about to be cleared
    VmResolved,
    /// NIC removal accepted and observed
    NicsCleared,
    /// New NIC accepted (terminal)
    NicAttached,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::VmResolved => "VM_RESOLVED",
            Self::NicsCleared => "NICS_CLEARED",
            Self::NicAttached => "NIC_ATTACHED",
        };
        f.write_str(label)
    }
}

/// Terminal outcome of a single record
///
/// Three classes:
/// - success: [`RecordOutcome::NicAttached`]
/// - skipped: the VM was never touched
/// - degraded: the VM's NICs were (possibly) removed and no new NIC is
///   confirmed; manual remediation is required
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The VM now has exactly one NIC on the target subnet with the preserved IP
    NicAttached {
        vm_id: String,
        subnet_id: String,
        static_ip: String,
    },
    /// No VM carries the record's instance name
    VmNotFound,
    /// Several VMs carry the record's instance name
    AmbiguousVm { vm_ids: Vec<String> },
    /// The instance name appears more than once in the record store
    DuplicateRecord { occurrences: usize },
    /// The record cannot be applied as-is (e.g. the IP does not parse)
    InvalidRecord { reason: String },
    /// The VM lookup itself failed
    LookupFailed { reason: String },
    /// Clearing NICs failed or never converged
    ClearFailed { vm_id: String, reason: String },
    /// NICs were cleared but the new NIC was not accepted
    AttachFailed { vm_id: String, reason: String },
}

impl RecordOutcome {
    /// Whether the record reached its terminal success state
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NicAttached { .. })
    }

    /// Whether the VM may have been left without a working NIC
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::ClearFailed { .. } | Self::AttachFailed { .. })
    }

    /// Whether the record was skipped before any mutation
    pub fn is_skipped(&self) -> bool {
        !self.is_success() && !self.is_degraded()
    }

    /// Short upper-case label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NicAttached { .. } => "NIC_ATTACHED",
            Self::VmNotFound => "VM_NOT_FOUND",
            Self::AmbiguousVm { .. } => "AMBIGUOUS_VM",
            Self::DuplicateRecord { .. } => "DUPLICATE_RECORD",
            Self::InvalidRecord { .. } => "INVALID_RECORD",
            Self::LookupFailed { .. } => "LOOKUP_FAILED",
            Self::ClearFailed { .. } => "CLEAR_FAILED",
            Self::AttachFailed { .. } => "ATTACH_FAILED",
        }
    }
}

impl fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NicAttached {
                vm_id,
                subnet_id,
                static_ip,
            } => write!(
                f,
                "{}: VM {} has NIC on subnet {} with IP {}",
                self.label(),
                vm_id,
                subnet_id,
                static_ip
            ),
            Self::VmNotFound => write!(f, "{}: no VM with this name", self.label()),
            Self::AmbiguousVm { vm_ids } => write!(
                f,
                "{}: {} VMs share this name ({})",
                self.label(),
                vm_ids.len(),
                vm_ids.join(", ")
            ),
            Self::DuplicateRecord { occurrences } => write!(
                f,
                "{}: name appears {} times in the record store",
                self.label(),
                occurrences
            ),
            Self::InvalidRecord { reason } | Self::LookupFailed { reason } => {
                write!(f, "{}: {}", self.label(), reason)
            }
            Self::ClearFailed { vm_id, reason } | Self::AttachFailed { vm_id, reason } => {
                write!(
                    f,
                    "{}: VM {} may have no NIC, remediate manually ({})",
                    self.label(),
                    vm_id,
                    reason
                )
            }
        }
    }
}

/// Outcome of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub record: PreservedIpRecord,
    pub outcome: RecordOutcome,
}

/// Aggregated result of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Resolved target subnet; `None` when there was nothing to do
    pub subnet: Option<SubnetHandle>,
    /// One entry per record, in store order
    pub records: Vec<RecordReport>,
    /// Whether writes were suppressed
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Records that reached `NicAttached`
    pub fn attached_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Records skipped without touching the VM
    pub fn skipped_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_skipped()).count()
    }

    /// Records whose VM needs manual remediation
    pub fn degraded_count(&self) -> usize {
        self.degraded().count()
    }

    /// Reports of degraded records
    pub fn degraded(&self) -> impl Iterator<Item = &RecordReport> {
        self.records.iter().filter(|r| r.outcome.is_degraded())
    }

    /// Whether any VM was left degraded
    pub fn has_degraded(&self) -> bool {
        self.records.iter().any(|r| r.outcome.is_degraded())
    }

    /// Outcome recorded for `instance_name` (first occurrence)
    pub fn outcome_for(&self, instance_name: &str) -> Option<&RecordOutcome> {
        self.records
            .iter()
            .find(|r| r.record.instance_name == instance_name)
            .map(|r| &r.outcome)
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.signed_duration_since(self.started_at)
    }
}
