//! VM specification envelope
//!
//! A [`VmSpecification`] is the full JSON document the platform returns for a
//! VM: `metadata`, the writable `spec`, and the platform-computed `status`.
//! The platform rejects updates that echo `status`, so the only way to build a
//! write body is [`VmSpecification::into_update_payload`], which drops it.
//!
//! ```text
//! {
//!   "metadata": { "uuid": "...", "spec_version": 3, ... },
//!   "spec":     { "name": "vm-a", "resources": { "nic_list": [ ... ], ... } },
//!   "status":   { "state": "COMPLETE", "resources": { "nic_list": [ ... ] } }
//! }
//! ```

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Platform processing state while a previous update is still being applied
const STATE_PENDING: &str = "PENDING";

/// Platform processing state after a failed update
const STATE_ERROR: &str = "ERROR";

/// A NIC as this workflow writes it: one subnet, optionally one static IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicDescriptor {
    /// Platform identifier of the subnet the NIC is bound to
    pub subnet_id: String,
    /// Static IP; `None` leaves allocation to the platform (DHCP)
    pub static_ip: Option<String>,
}

impl NicDescriptor {
    /// NIC on `subnet_id` with a static IP
    pub fn with_static_ip(subnet_id: impl Into<String>, static_ip: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            static_ip: Some(static_ip.into()),
        }
    }

    /// Wire representation inside `spec.resources.nic_list`
    pub fn to_value(&self) -> Value {
        let mut nic = json!({
            "subnet_reference": {
                "kind": "subnet",
                "uuid": self.subnet_id,
            }
        });
        if let Some(ip) = &self.static_ip {
            nic["ip_endpoint_list"] = json!([{ "ip": ip }]);
        }
        nic
    }

    /// Parse a NIC entry; `None` if it is not bound to a subnet by uuid
    pub fn from_value(value: &Value) -> Option<Self> {
        let subnet_id = value["subnet_reference"]["uuid"].as_str()?.to_string();
        let static_ip = value["ip_endpoint_list"]
            .as_array()
            .and_then(|endpoints| endpoints.first())
            .and_then(|endpoint| endpoint["ip"].as_str())
            .map(str::to_string);
        Some(Self {
            subnet_id,
            static_ip,
        })
    }
}

/// Full VM document as read from the platform
#[derive(Debug, Clone, PartialEq)]
pub struct VmSpecification {
    document: Value,
}

impl VmSpecification {
    /// Wrap a platform response, checking it has a writable `spec.resources`
    pub fn from_value(document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(Error::invalid_spec("VM document is not a JSON object"));
        }
        if !document["spec"]["resources"].is_object() {
            return Err(Error::invalid_spec("VM document has no spec.resources object"));
        }
        Ok(Self { document })
    }

    /// VM name as held in the writable spec
    pub fn name(&self) -> Option<&str> {
        self.document["spec"]["name"].as_str()
    }

    /// `metadata.spec_version`, used by the platform to reject stale writes
    pub fn spec_version(&self) -> Option<u64> {
        self.document["metadata"]["spec_version"].as_u64()
    }

    /// NICs requested by the writable spec
    pub fn desired_nic_list(&self) -> &[Value] {
        self.document["spec"]["resources"]["nic_list"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// NICs the platform reports as actually present
    ///
    /// Falls back to the desired list when the document carries no `status`.
    pub fn observed_nic_list(&self) -> &[Value] {
        match self.document.get("status") {
            Some(status) => status["resources"]["nic_list"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            None => self.desired_nic_list(),
        }
    }

    /// Desired NICs that parse as [`NicDescriptor`]s
    pub fn desired_nics(&self) -> Vec<NicDescriptor> {
        self.desired_nic_list()
            .iter()
            .filter_map(NicDescriptor::from_value)
            .collect()
    }

    /// `status.state`, e.g. `PENDING` or `COMPLETE`
    pub fn platform_state(&self) -> Option<&str> {
        self.document["status"]["state"].as_str()
    }

    /// Whether the platform is still applying an earlier update
    pub fn is_pending(&self) -> bool {
        self.platform_state() == Some(STATE_PENDING)
    }

    /// Whether the platform failed to apply the last update
    pub fn is_errored(&self) -> bool {
        self.platform_state() == Some(STATE_ERROR)
    }

    /// Messages attached to `status.message_list`, joined for diagnostics
    pub fn platform_messages(&self) -> String {
        self.document["status"]["message_list"]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m["message"].as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default()
    }

    /// Whether an identical NIC is already requested
    pub fn has_nic(&self, nic: &NicDescriptor) -> bool {
        self.desired_nics().iter().any(|existing| existing == nic)
    }

    /// Replace the NIC list with an empty one
    pub fn clear_nics(&mut self) {
        self.document["spec"]["resources"]["nic_list"] = Value::Array(Vec::new());
    }

    /// Append a NIC to the existing list
    pub fn push_nic(&mut self, nic: &NicDescriptor) {
        let list = &mut self.document["spec"]["resources"]["nic_list"];
        if !list.is_array() {
            *list = Value::Array(Vec::new());
        }
        if let Value::Array(nics) = list {
            nics.push(nic.to_value());
        }
    }

    /// Turn the document into a write body, dropping the read-only `status`
    pub fn into_update_payload(mut self) -> VmUpdatePayload {
        if let Value::Object(root) = &mut self.document {
            root.remove("status");
        }
        VmUpdatePayload {
            document: self.document,
        }
    }

    /// Raw document
    pub fn as_value(&self) -> &Value {
        &self.document
    }
}

/// Body of a full-representation VM update; never carries `status`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VmUpdatePayload {
    document: Value,
}

impl VmUpdatePayload {
    /// Raw document that will be submitted
    pub fn as_value(&self) -> &Value {
        &self.document
    }

    /// Consume the payload, returning the raw document
    pub fn into_value(self) -> Value {
        self.document
    }
}
