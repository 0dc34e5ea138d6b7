//! Configuration types for the IP preservation system
//!
//! All settings are passed explicitly to the components that need them; there
//! is no process-wide session state.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::traits::PreservedIpRecord;

/// Largest page the platform accepts on list calls
const MAX_PAGE_SIZE: u32 = 500;

/// Upper bound for the initial retry delay (5 minutes)
const MAX_RETRY_DELAY_SECS: u64 = 300;

/// Upper bound for the convergence wait (24 hours)
const MAX_CONVERGENCE_TIMEOUT_SECS: u64 = 86_400;

/// Upper bound for the event channel capacity
const MAX_EVENT_CHANNEL_CAPACITY: usize = 65_536;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPreserveConfig {
    /// Target platform connection settings
    pub platform: PlatformConfig,

    /// Where preserved-IP records are read from
    pub record_store: RecordStoreConfig,

    /// Orchestration settings
    pub orchestrator: OrchestratorConfig,
}

impl IpPreserveConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.platform.validate()?;
        self.record_store.validate()?;
        self.orchestrator.validate()?;
        Ok(())
    }
}

/// Connection settings for the platform control API
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the API, e.g. `https://10.0.0.10:9440/api/nutanix/v3`
    pub endpoint: String,

    /// Basic auth user
    pub username: String,

    /// Basic auth password
    /// ⚠️ NEVER log this value
    pub password: String,

    /// Skip TLS certificate validation (self-signed endpoints)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Per-request timeout (in seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Page size for VM listing
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Send `use_categories_mapping=true` on VM reads and writes
    #[serde(default)]
    pub use_categories_mapping: bool,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("page_size", &self.page_size)
            .field("use_categories_mapping", &self.use_categories_mapping)
            .finish()
    }
}

impl PlatformConfig {
    /// Create a platform configuration with default tuning
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
            request_timeout_secs: default_request_timeout_secs(),
            page_size: default_page_size(),
            use_categories_mapping: false,
        }
    }

    /// Validate the platform configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.endpoint.is_empty() {
            return Err(crate::Error::config("Platform endpoint cannot be empty"));
        }
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "Platform endpoint must use HTTP or HTTPS scheme. Got: {}",
                self.endpoint
            )));
        }
        if self.username.is_empty() {
            return Err(crate::Error::config("Platform username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(crate::Error::config("Platform password cannot be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(crate::Error::config(format!(
                "Page size must be between 1 and {}. Got: {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        Ok(())
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordStoreConfig {
    /// JSON file: plain array, `{"records": [...]}`, or a table scan export
    File {
        /// Path to the file
        path: String,
    },

    /// Full scan of a DynamoDB table
    #[serde(rename = "dynamodb")]
    DynamoDb {
        /// Table name
        table: String,
        /// AWS region; the SDK's default resolution applies when absent
        #[serde(default)]
        region: Option<String>,
    },

    /// Records given directly in configuration
    Inline {
        /// The records
        records: Vec<PreservedIpRecord>,
    },
}

impl RecordStoreConfig {
    /// Validate the record store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            RecordStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("Record file path cannot be empty"))
            }
            RecordStoreConfig::DynamoDb { table, .. } if table.trim().is_empty() => {
                Err(crate::Error::config("Record table name cannot be empty"))
            }
            RecordStoreConfig::DynamoDb {
                region: Some(region),
                ..
            } if region.trim().is_empty() => {
                Err(crate::Error::config("Record table region cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// How a record is matched to a VM when several VMs share its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmMatchStrategy {
    /// Take the first VM in platform listing order
    FirstMatch,
    /// Skip the record and report the ambiguity
    #[default]
    RequireUnique,
}

impl FromStr for VmMatchStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "first_match" => Ok(Self::FirstMatch),
            "require_unique" => Ok(Self::RequireUnique),
            other => Err(crate::Error::config(format!(
                "Unknown VM match strategy '{}'. Valid: first_match, require_unique",
                other
            ))),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Name of the subnet every new NIC is attached to
    pub subnet_name: String,

    /// VM name matching strategy
    #[serde(default)]
    pub vm_match: VmMatchStrategy,

    /// Maximum number of retries for transient platform failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial delay between retries (in seconds), doubled on each retry
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// How long to wait for NIC removal to become observable (in seconds)
    ///
    /// Exceeding it reports the record as `ClearFailed`.
    #[serde(default = "default_convergence_timeout_secs")]
    pub convergence_timeout_secs: u64,

    /// Interval between convergence checks (in seconds)
    #[serde(default = "default_convergence_poll_interval_secs")]
    pub convergence_poll_interval_secs: u64,

    /// Capacity of the event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Perform all reads, log intended writes, submit nothing
    #[serde(default)]
    pub dry_run: bool,
}

impl OrchestratorConfig {
    /// Create an orchestrator configuration with defaults
    pub fn new(subnet_name: impl Into<String>) -> Self {
        Self {
            subnet_name: subnet_name.into(),
            vm_match: VmMatchStrategy::default(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            convergence_timeout_secs: default_convergence_timeout_secs(),
            convergence_poll_interval_secs: default_convergence_poll_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            dry_run: false,
        }
    }

    /// Set the VM match strategy
    pub fn with_vm_match(mut self, vm_match: VmMatchStrategy) -> Self {
        self.vm_match = vm_match;
        self
    }

    /// Enable or disable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Validate the orchestrator configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.subnet_name.trim().is_empty() {
            return Err(crate::Error::config("Subnet name cannot be empty"));
        }
        if self.max_retries > 10 {
            return Err(crate::Error::config(format!(
                "Max retries must be between 0 and 10. Got: {}",
                self.max_retries
            )));
        }
        if self.retry_delay_secs > MAX_RETRY_DELAY_SECS {
            return Err(crate::Error::config(format!(
                "Retry delay must be at most {} seconds. Got: {}",
                MAX_RETRY_DELAY_SECS, self.retry_delay_secs
            )));
        }
        if self.convergence_poll_interval_secs == 0 {
            return Err(crate::Error::config("Convergence poll interval must be > 0"));
        }
        if self.convergence_timeout_secs > MAX_CONVERGENCE_TIMEOUT_SECS {
            return Err(crate::Error::config(format!(
                "Convergence timeout must be at most {} seconds. Got: {}",
                MAX_CONVERGENCE_TIMEOUT_SECS, self.convergence_timeout_secs
            )));
        }
        if self.convergence_timeout_secs < self.convergence_poll_interval_secs {
            return Err(crate::Error::config(
                "Convergence timeout must be at least one poll interval",
            ));
        }
        if self.event_channel_capacity == 0
            || self.event_channel_capacity > MAX_EVENT_CHANNEL_CAPACITY
        {
            return Err(crate::Error::config(format!(
                "Event channel capacity must be between 1 and {}. Got: {}",
                MAX_EVENT_CHANNEL_CAPACITY, self.event_channel_capacity
            )));
        }
        Ok(())
    }

    /// Initial retry delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Convergence deadline after a clear
    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_secs(self.convergence_timeout_secs)
    }

    /// Convergence poll interval
    pub fn convergence_poll_interval(&self) -> Duration {
        Duration::from_secs(self.convergence_poll_interval_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    250
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_convergence_timeout_secs() -> u64 {
    120
}

fn default_convergence_poll_interval_secs() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    256
}
