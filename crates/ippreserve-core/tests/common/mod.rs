//! Test doubles and common utilities for contract tests
//!
//! `FakePlatform` keeps a small in-memory inventory of VMs and subnets and
//! behaves like the platform's v3 API: full-representation writes, a
//! `spec_version` check, and an observed NIC list that can lag behind the
//! requested one.

#![allow(dead_code)]

use async_trait::async_trait;
use ippreserve_core::config::OrchestratorConfig;
use ippreserve_core::error::{Error, Result};
use ippreserve_core::traits::{
    PlatformDirectory, PreservedIpRecord, RecordStore, RecordStream, SubnetHandle,
    UpdateAccepted, VmHandle, VmSpecApi,
};
use ippreserve_core::vm_spec::{VmSpecification, VmUpdatePayload};
use ippreserve_core::{MemoryRecordStore, Orchestrator, OrchestratorEvent};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A VM as held by the fake platform
#[derive(Debug, Clone)]
struct FakeVm {
    id: String,
    name: String,
    /// `spec.resources.nic_list`
    desired: Vec<Value>,
    /// `status.resources.nic_list`
    observed: Vec<Value>,
    spec_version: u64,
    state: &'static str,
    /// Reads left before the last accepted update becomes observable
    pending_reads: usize,
}

impl FakeVm {
    fn document(&self) -> Value {
        json!({
            "api_version": "3.1",
            "metadata": {
                "kind": "vm",
                "uuid": self.id,
                "spec_version": self.spec_version,
                "categories": { "Environment": "Production" }
            },
            "spec": {
                "name": self.name,
                "resources": {
                    "power_state": "ON",
                    "num_sockets": 2,
                    "nic_list": self.desired
                }
            },
            "status": {
                "name": self.name,
                "state": self.state,
                "resources": {
                    "power_state": "ON",
                    "nic_list": self.observed
                }
            }
        })
    }
}

/// Which writes a VM refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    /// Writes with an empty NIC list
    Clear,
    /// Writes with a non-empty NIC list
    Attach,
}

/// In-memory platform implementing both `PlatformDirectory` and `VmSpecApi`
///
/// Clones share inventory, counters and injected failures.
#[derive(Clone, Default)]
pub struct FakePlatform {
    vms: Arc<Mutex<Vec<FakeVm>>>,
    subnets: Arc<Mutex<Vec<SubnetHandle>>>,

    /// Call counter for find_subnet_by_name()
    subnet_lookups: Arc<AtomicUsize>,
    /// Call counter for find_vms_by_name()
    vm_lookups: Arc<AtomicUsize>,
    /// Call counter for get_vm()
    reads: Arc<AtomicUsize>,
    /// Call counter for update_vm()
    updates: Arc<AtomicUsize>,

    /// Every submitted payload, with the target VM id
    payloads: Arc<Mutex<Vec<(String, Value)>>>,

    /// Next N subnet lookups fail with PlatformUnavailable
    failing_subnet_lookups: Arc<AtomicUsize>,
    /// Next N VM lookups fail with PlatformUnavailable
    failing_vm_lookups: Arc<AtomicUsize>,
    /// Next N updates fail with PlatformUnavailable before being applied
    failing_updates: Arc<AtomicUsize>,
    /// Next N updates find their spec_version already superseded
    conflicting_updates: Arc<AtomicUsize>,
    /// Permanent rejections per VM id
    rejections: Arc<Mutex<HashMap<String, Rejection>>>,
    /// Reads needed before an accepted update is observed
    removal_lag: Arc<AtomicUsize>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subnet
    pub fn with_subnet(self, id: &str, name: &str) -> Self {
        self.subnets
            .lock()
            .unwrap()
            .push(SubnetHandle::new(id, name));
        self
    }

    /// Add a VM carrying `nics` (already applied and observed)
    pub fn with_vm(self, id: &str, name: &str, nics: Vec<Value>) -> Self {
        self.vms.lock().unwrap().push(FakeVm {
            id: id.to_string(),
            name: name.to_string(),
            desired: nics.clone(),
            observed: nics,
            spec_version: 1,
            state: "COMPLETE",
            pending_reads: 0,
        });
        self
    }

    /// Every accepted update stays unobserved for `reads` subsequent reads
    pub fn with_removal_lag(self, reads: usize) -> Self {
        self.removal_lag.store(reads, Ordering::SeqCst);
        self
    }

    /// Refuse every write that clears the NICs of `vm_id`
    pub fn rejecting_clear(self, vm_id: &str) -> Self {
        self.rejections
            .lock()
            .unwrap()
            .insert(vm_id.to_string(), Rejection::Clear);
        self
    }

    /// Refuse every write that adds a NIC to `vm_id`
    pub fn rejecting_attach(self, vm_id: &str) -> Self {
        self.rejections
            .lock()
            .unwrap()
            .insert(vm_id.to_string(), Rejection::Attach);
        self
    }

    /// Fail the next `count` subnet lookups with PlatformUnavailable
    pub fn failing_subnet_lookups(self, count: usize) -> Self {
        self.failing_subnet_lookups.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` VM lookups with PlatformUnavailable
    pub fn failing_vm_lookups(self, count: usize) -> Self {
        self.failing_vm_lookups.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` updates with PlatformUnavailable
    pub fn failing_updates(self, count: usize) -> Self {
        self.failing_updates.store(count, Ordering::SeqCst);
        self
    }

    /// Let another writer update the VM just before each of the next `count` updates
    pub fn conflicting_updates(self, count: usize) -> Self {
        self.conflicting_updates.store(count, Ordering::SeqCst);
        self
    }

    /// Requested NICs of `vm_id`
    pub fn nic_list(&self, vm_id: &str) -> Vec<Value> {
        self.vms
            .lock()
            .unwrap()
            .iter()
            .find(|vm| vm.id == vm_id)
            .map(|vm| vm.desired.clone())
            .unwrap_or_default()
    }

    pub fn subnet_lookup_count(&self) -> usize {
        self.subnet_lookups.load(Ordering::SeqCst)
    }

    pub fn vm_lookup_count(&self) -> usize {
        self.vm_lookups.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Submitted payloads, in order
    pub fn payloads(&self) -> Vec<(String, Value)> {
        self.payloads.lock().unwrap().clone()
    }

    /// Submitted payloads for `vm_id`
    pub fn payloads_for(&self, vm_id: &str) -> Vec<Value> {
        self.payloads()
            .into_iter()
            .filter(|(id, _)| id == vm_id)
            .map(|(_, payload)| payload)
            .collect()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PlatformDirectory for FakePlatform {
    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<VmHandle>> {
        self.vm_lookups.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_vm_lookups) {
            return Err(Error::platform_unavailable("vms/list returned 503"));
        }

        Ok(self
            .vms
            .lock()
            .unwrap()
            .iter()
            .filter(|vm| vm.name == name)
            .map(|vm| VmHandle::new(&vm.id, &vm.name))
            .collect())
    }

    async fn find_subnet_by_name(&self, name: &str) -> Result<Option<SubnetHandle>> {
        self.subnet_lookups.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_subnet_lookups) {
            return Err(Error::platform_unavailable("subnets/list returned 503"));
        }

        Ok(self
            .subnets
            .lock()
            .unwrap()
            .iter()
            .find(|subnet| subnet.name == name)
            .cloned())
    }
}

#[async_trait]
impl VmSpecApi for FakePlatform {
    async fn get_vm(&self, vm_id: &str) -> Result<VmSpecification> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let mut vms = self.vms.lock().unwrap();
        let vm = vms
            .iter_mut()
            .find(|vm| vm.id == vm_id)
            .ok_or_else(|| Error::VmNotFound(vm_id.to_string()))?;

        if vm.pending_reads > 0 {
            vm.pending_reads -= 1;
        } else {
            vm.observed = vm.desired.clone();
            vm.state = "COMPLETE";
        }

        VmSpecification::from_value(vm.document())
    }

    async fn update_vm(&self, vm_id: &str, payload: &VmUpdatePayload) -> Result<UpdateAccepted> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let body = payload.as_value().clone();
        self.payloads
            .lock()
            .unwrap()
            .push((vm_id.to_string(), body.clone()));

        if Self::take_failure(&self.failing_updates) {
            return Err(Error::platform_unavailable("PUT vms returned 503"));
        }
        if body.get("status").is_some() {
            return Err(Error::rejected(422, "status is read-only"));
        }

        let nics = body["spec"]["resources"]["nic_list"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        match self.rejections.lock().unwrap().get(vm_id) {
            Some(Rejection::Clear) if nics.is_empty() => {
                return Err(Error::rejected(422, "NIC removal refused"));
            }
            Some(Rejection::Attach) if !nics.is_empty() => {
                return Err(Error::rejected(422, "IP address already in use"));
            }
            _ => {}
        }

        let lag = self.removal_lag.load(Ordering::SeqCst);
        let mut vms = self.vms.lock().unwrap();
        let vm = vms
            .iter_mut()
            .find(|vm| vm.id == vm_id)
            .ok_or_else(|| Error::VmNotFound(vm_id.to_string()))?;

        if Self::take_failure(&self.conflicting_updates) {
            vm.spec_version += 1;
        }
        if body["metadata"]["spec_version"].as_u64() != Some(vm.spec_version) {
            return Err(Error::conflict(format!(
                "spec_version {} is stale",
                body["metadata"]["spec_version"]
            )));
        }

        vm.desired = nics;
        vm.spec_version += 1;
        vm.state = "PENDING";
        vm.pending_reads = lag;

        Ok(UpdateAccepted {
            task_id: Some(format!("task-{}", self.update_count())),
        })
    }

    fn platform_name(&self) -> &'static str {
        "fake"
    }
}

/// A record store that yields some records and then fails
pub struct FailingRecordStore {
    records: Vec<PreservedIpRecord>,
}

impl FailingRecordStore {
    pub fn after(records: Vec<PreservedIpRecord>) -> Self {
        Self { records }
    }
}

impl RecordStore for FailingRecordStore {
    fn list_records(&self) -> RecordStream {
        let mut items: Vec<Result<PreservedIpRecord>> =
            self.records.iter().cloned().map(Ok).collect();
        items.push(Err(Error::store_unavailable("scan interrupted")));
        Box::pin(tokio_stream::iter(items))
    }

    fn store_name(&self) -> &'static str {
        "failing"
    }
}

/// A NIC as a pre-migration VM would carry it
pub fn legacy_nic(subnet_id: &str, ip: &str) -> Value {
    json!({
        "nic_type": "NORMAL_NIC",
        "mac_address": "50:6b:8d:00:00:01",
        "subnet_reference": { "kind": "subnet", "uuid": subnet_id },
        "ip_endpoint_list": [ { "ip": ip, "type": "ASSIGNED" } ]
    })
}

/// The NIC this workflow attaches
pub fn expected_nic(subnet_id: &str, ip: &str) -> Value {
    json!({
        "subnet_reference": { "kind": "subnet", "uuid": subnet_id },
        "ip_endpoint_list": [ { "ip": ip } ]
    })
}

/// Orchestrator config with short delays for tests
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new("Subnet1");
    config.max_retries = 3;
    config.retry_delay_secs = 1;
    config.convergence_timeout_secs = 10;
    config.convergence_poll_interval_secs = 1;
    config.event_channel_capacity = 1024;
    config
}

/// Build an orchestrator over an in-memory record store and `platform`
pub fn orchestrator(
    records: Vec<PreservedIpRecord>,
    platform: &FakePlatform,
    config: OrchestratorConfig,
) -> (Orchestrator, mpsc::Receiver<OrchestratorEvent>) {
    Orchestrator::new(
        Box::new(MemoryRecordStore::with_records(records)),
        Arc::new(platform.clone()),
        Arc::new(platform.clone()),
        config,
    )
    .expect("orchestrator construction succeeds")
}

/// Drain every event emitted so far
pub fn drain_events(rx: &mut mpsc::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
