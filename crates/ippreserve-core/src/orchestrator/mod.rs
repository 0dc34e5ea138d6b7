//! NIC Reconfiguration Orchestrator
//!
//! The Orchestrator drives every preserved-IP record to its terminal state:
//! - Enumerates the record store once
//! - Resolves the target subnet once
//! - Per record: resolves the VM, clears its NICs, waits for the removal to
//!   be observed, attaches one NIC with the preserved static IP
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ RecordStore │─── PreservedIpRecord ───┐
//! └─────────────┘                         │
//!                                         ▼
//!                                ┌──────────────┐
//!                                │ Orchestrator │
//!                                └──────────────┘
//!                                         │
//!         ┌───────────────────────────────┼───────────────────────────┐
//!         │                               │                           │
//!         ▼                               ▼                           ▼
//! ┌───────────────────┐         ┌───────────────┐           ┌─────────────┐
//! │ PlatformDirectory │         │ VmSpecMutator │           │   Events    │
//! │ (resolve names)   │         │ (clear/attach)│           │  (notify)   │
//! └───────────────────┘         └───────────────┘           └─────────────┘
//! ```
//!
//! ## Failure Policy
//!
//! Only a store scan failure and a subnet resolution failure abort the run,
//! and both happen before any VM is touched. Every other failure is folded
//! into that record's [`RecordOutcome`] and the run moves on.
//!
//! Records are processed strictly one after another: one VM's full
//! clear → wait → attach cycle completes before the next record starts.

mod report;

pub use report::{RecordOutcome, RecordReport, RecordState, RunReport};

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::{OrchestratorConfig, VmMatchStrategy};
use crate::error::{Error, Result};
use crate::mutator::{MutationResult, VmSpecMutator};
use crate::traits::{PlatformDirectory, PreservedIpRecord, RecordStore, SubnetHandle, VmSpecApi};

/// Events emitted by the Orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Records loaded; processing is about to start
    RunStarted { records_count: usize, dry_run: bool },

    /// Target subnet resolved
    SubnetResolved { subnet: SubnetHandle },

    /// A record advanced through the state machine
    StateChanged {
        instance_name: String,
        state: RecordState,
    },

    /// A record reached its terminal outcome
    RecordFinished {
        instance_name: String,
        outcome: RecordOutcome,
    },

    /// Every record has been processed
    RunFinished {
        attached: usize,
        skipped: usize,
        degraded: usize,
    },
}

/// NIC Reconfiguration Orchestrator
///
/// ## Lifecycle
///
/// 1. Create with [`Orchestrator::new()`]
/// 2. Either call [`Orchestrator::run()`], or split it into
///    [`Orchestrator::load_records()`] and [`Orchestrator::run_with_records()`]
///    to inspect the records in between (e.g. for an operator confirmation)
/// 3. Read the returned [`RunReport`]
///
/// ## Retries
///
/// Transient failures (`PlatformUnavailable`, `Conflict`) of a single remote
/// step are retried with exponential backoff, each attempt starting from a
/// fresh read. Platform clients never retry on their own.
pub struct Orchestrator {
    /// Preserved-IP records
    store: Box<dyn RecordStore>,

    /// Name resolution
    directory: Arc<dyn PlatformDirectory>,

    /// Read-modify-write of VM specifications
    mutator: VmSpecMutator,

    config: OrchestratorConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver yields
    /// orchestrator events
    pub fn new(
        store: Box<dyn RecordStore>,
        directory: Arc<dyn PlatformDirectory>,
        vm_api: Arc<dyn VmSpecApi>,
        config: OrchestratorConfig,
    ) -> Result<(Self, mpsc::Receiver<OrchestratorEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let orchestrator = Self {
            store,
            directory,
            mutator: VmSpecMutator::new(vm_api, config.dry_run),
            config,
            event_tx: tx,
        };

        Ok((orchestrator, rx))
    }

    /// Configuration the orchestrator was built with
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Load all records, then process them
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: every record reached a terminal outcome
    /// - `Err(Error::StoreUnavailable)`: the store scan failed
    /// - `Err(Error::SubnetNotFound | Error::PlatformUnavailable | ..)`:
    ///   the subnet could not be resolved
    pub async fn run(&self) -> Result<RunReport> {
        let records = self.load_records().await?;
        self.run_with_records(records).await
    }

    /// Scan the record store to completion
    ///
    /// The full set is read before anything else happens, so a failing scan
    /// never leaves a run half done.
    pub async fn load_records(&self) -> Result<Vec<PreservedIpRecord>> {
        let mut stream = self.store.list_records();
        let mut records = Vec::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => records.push(record),
                Err(Error::StoreUnavailable(msg)) => {
                    error!("Record store {} unavailable: {}", self.store.store_name(), msg);
                    return Err(Error::StoreUnavailable(msg));
                }
                Err(e) => {
                    error!("Record store {} failed: {}", self.store.store_name(), e);
                    return Err(Error::store_unavailable(e.to_string()));
                }
            }
        }

        info!(
            "Loaded {} record(s) from {} store",
            records.len(),
            self.store.store_name()
        );
        Ok(records)
    }

    /// Process an already loaded record set
    pub async fn run_with_records(&self, records: Vec<PreservedIpRecord>) -> Result<RunReport> {
        let started_at = Utc::now();

        self.emit_event(OrchestratorEvent::RunStarted {
            records_count: records.len(),
            dry_run: self.config.dry_run,
        });

        if records.is_empty() {
            info!("No preserved-IP records, nothing to do");
            let report = RunReport {
                subnet: None,
                records: Vec::new(),
                dry_run: self.config.dry_run,
                started_at,
                finished_at: Utc::now(),
            };
            self.emit_finished(&report);
            return Ok(report);
        }

        let subnet = self.resolve_subnet().await?;

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *occurrences.entry(record.instance_name.as_str()).or_default() += 1;
        }

        let mut reports = Vec::with_capacity(records.len());
        for record in &records {
            let count = occurrences
                .get(record.instance_name.as_str())
                .copied()
                .unwrap_or(1);

            let outcome = self.process_record(record, &subnet, count).await;

            if outcome.is_degraded() {
                warn!("{} -> {}", record.instance_name, outcome);
            } else if outcome.is_success() {
                info!("{} -> {}", record.instance_name, outcome);
            } else {
                warn!("Skipped {}: {}", record.instance_name, outcome);
            }

            self.emit_event(OrchestratorEvent::RecordFinished {
                instance_name: record.instance_name.clone(),
                outcome: outcome.clone(),
            });
            reports.push(RecordReport {
                record: record.clone(),
                outcome,
            });
        }

        let report = RunReport {
            subnet: Some(subnet),
            records: reports,
            dry_run: self.config.dry_run,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "Run finished: {} attached, {} skipped, {} degraded",
            report.attached_count(),
            report.skipped_count(),
            report.degraded_count()
        );
        self.emit_finished(&report);

        Ok(report)
    }

    /// Resolve the configured subnet; any failure is run-fatal
    async fn resolve_subnet(&self) -> Result<SubnetHandle> {
        let name = self.config.subnet_name.as_str();

        let subnet = self
            .with_retry("resolve subnet", || self.directory.find_subnet_by_name(name))
            .await
            .inspect_err(|e| error!("Failed to resolve subnet {}: {}", name, e))?;

        match subnet {
            Some(subnet) => {
                info!("Resolved subnet {} -> {}", subnet.name, subnet.id);
                self.emit_event(OrchestratorEvent::SubnetResolved {
                    subnet: subnet.clone(),
                });
                Ok(subnet)
            }
            None => {
                error!("Subnet {} not found, aborting before any VM is touched", name);
                Err(Error::SubnetNotFound(name.to_string()))
            }
        }
    }

    /// Drive one record to its terminal outcome
    async fn process_record(
        &self,
        record: &PreservedIpRecord,
        subnet: &SubnetHandle,
        occurrences: usize,
    ) -> RecordOutcome {
        let name = record.instance_name.as_str();
        self.emit_state(name, RecordState::Pending);

        if occurrences > 1 {
            return RecordOutcome::DuplicateRecord { occurrences };
        }

        let static_ip = match record.private_ip.trim().parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => {
                return RecordOutcome::InvalidRecord {
                    reason: format!("'{}' is not an IP address", record.private_ip),
                };
            }
        };

        // PENDING → VM_RESOLVED
        let candidates = match self
            .with_retry("find VM", || self.directory.find_vms_by_name(name))
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                return RecordOutcome::LookupFailed {
                    reason: e.to_string(),
                };
            }
        };

        let vm = match (candidates.len(), self.config.vm_match) {
            (0, _) => return RecordOutcome::VmNotFound,
            (1, _) | (_, VmMatchStrategy::FirstMatch) => {
                if candidates.len() > 1 {
                    warn!(
                        "{} VMs named {}, using the first ({})",
                        candidates.len(),
                        name,
                        candidates[0].id
                    );
                }
                candidates[0].clone()
            }
            (_, VmMatchStrategy::RequireUnique) => {
                return RecordOutcome::AmbiguousVm {
                    vm_ids: candidates.into_iter().map(|vm| vm.id).collect(),
                };
            }
        };
        debug!("Resolved VM {} -> {}", name, vm.id);
        self.emit_state(name, RecordState::VmResolved);

        // VM_RESOLVED → NICS_CLEARED
        if let Err(e) = self
            .with_retry("clear NICs", || self.mutator.clear_all_nics(&vm.id))
            .await
        {
            return RecordOutcome::ClearFailed {
                vm_id: vm.id,
                reason: e.to_string(),
            };
        }

        if !self.mutator.is_dry_run()
            && let Err(e) = self.wait_for_nics_cleared(&vm.id).await
        {
            let reason = match e {
                Error::ClearFailed { reason, .. } => reason,
                other => other.to_string(),
            };
            return RecordOutcome::ClearFailed {
                vm_id: vm.id,
                reason,
            };
        }
        self.emit_state(name, RecordState::NicsCleared);

        // NICS_CLEARED → NIC_ATTACHED
        match self
            .with_retry("attach NIC", || {
                self.mutator.attach_nic(&vm.id, &subnet.id, &static_ip)
            })
            .await
        {
            Ok(result) => {
                if result == MutationResult::Unchanged {
                    debug!("NIC on VM {} was already in place", vm.id);
                }
                self.emit_state(name, RecordState::NicAttached);
                RecordOutcome::NicAttached {
                    vm_id: vm.id,
                    subnet_id: subnet.id.clone(),
                    static_ip,
                }
            }
            Err(e) => RecordOutcome::AttachFailed {
                vm_id: vm.id,
                reason: e.to_string(),
            },
        }
    }

    /// Poll the VM until no NIC is observed and no update is pending
    ///
    /// # Errors
    ///
    /// - `Error::ClearFailed` when the deadline passes first
    /// - Any non-transient error from reading the VM
    async fn wait_for_nics_cleared(&self, vm_id: &str) -> Result<()> {
        let timeout = self.config.convergence_timeout();
        let poll_interval = self.config.convergence_poll_interval();
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            Error::config(format!(
                "Convergence timeout of {}s is out of range",
                timeout.as_secs()
            ))
        })?;
        let mut last_seen = String::from("not observed");

        loop {
            match self.mutator.observe(vm_id).await {
                Ok(spec) => {
                    let remaining = spec.observed_nic_list().len();
                    if remaining == 0 && !spec.is_pending() {
                        debug!("NIC removal on VM {} converged", vm_id);
                        return Ok(());
                    }

                    last_seen = format!(
                        "{} NIC(s) present, state {}",
                        remaining,
                        spec.platform_state().unwrap_or("unknown")
                    );
                    let messages = spec.platform_messages();
                    if !messages.is_empty() {
                        last_seen.push_str(&format!(", messages: {}", messages));
                    }
                    debug!("Waiting for NIC removal on VM {}: {}", vm_id, last_seen);
                }
                Err(e) if e.is_transient() => {
                    warn!("Convergence check for VM {} failed: {}", vm_id, e);
                    last_seen = e.to_string();
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ClearFailed {
                    vm_id: vm_id.to_string(),
                    reason: format!(
                        "NIC removal did not converge within {}s ({})",
                        timeout.as_secs(),
                        last_seen
                    ),
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Run `operation`, retrying transient failures with exponential backoff
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.config.retry_delay();
        let mut attempt = 0;

        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation,
                        attempt,
                        self.config.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn emit_state(&self, instance_name: &str, state: RecordState) {
        debug!("{} -> {}", instance_name, state);
        self.emit_event(OrchestratorEvent::StateChanged {
            instance_name: instance_name.to_string(),
            state,
        });
    }

    fn emit_finished(&self, report: &RunReport) {
        self.emit_event(OrchestratorEvent::RunFinished {
            attached: report.attached_count(),
            skipped: report.skipped_count(),
            degraded: report.degraded_count(),
        });
    }

    /// Emit an orchestrator event
    fn emit_event(&self, event: OrchestratorEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            // Nobody is keeping up; drop rather than block the run
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Event channel full, dropping event. \
                    Consider increasing event_channel_capacity."
                );
            }
            // No listener
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.store_name())
            .field("mutator", &self.mutator)
            .field("config", &self.config)
            .finish()
    }
}
