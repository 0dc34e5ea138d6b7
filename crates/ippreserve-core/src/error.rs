//! Error types for the IP preservation system
//!
//! Remote failures are classified into these kinds at the point where they
//! are observed. Per-record failures never surface as `Error` from a run;
//! they are folded into a [`RecordOutcome`](crate::orchestrator::RecordOutcome).

use thiserror::Error;

/// Result type alias for IP preservation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the IP preservation system
#[derive(Error, Debug)]
pub enum Error {
    /// The preserved-IP record store could not be scanned
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    /// The configured target subnet does not exist on the platform
    #[error("Subnet not found: {0}")]
    SubnetNotFound(String),

    /// The platform API could not be reached or answered with a transient failure
    #[error("Platform unavailable: {0}")]
    PlatformUnavailable(String),

    /// No VM with the given name exists on the platform
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// Clearing the NIC list of a VM failed
    #[error("Clearing NICs of VM {vm_id} failed: {reason}")]
    ClearFailed {
        /// Platform identifier of the VM
        vm_id: String,
        /// Why the clear failed
        reason: String,
    },

    /// Attaching the new NIC to a VM failed
    #[error("Attaching NIC to VM {vm_id} failed: {reason}")]
    AttachFailed {
        /// Platform identifier of the VM
        vm_id: String,
        /// Why the attach failed
        reason: String,
    },

    /// Credentials were refused by the platform
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The platform refused a write because the specification was stale
    #[error("Update conflict: {0}")]
    Conflict(String),

    /// The platform rejected a request for a non-transient reason
    #[error("Platform rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status code returned by the platform
        status: u16,
        /// Response body, surfaced for diagnostics
        body: String,
    },

    /// A VM specification did not have the expected shape
    #[error("Invalid VM specification: {0}")]
    InvalidSpec(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a record store error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a platform availability error
    pub fn platform_unavailable(msg: impl Into<String>) -> Self {
        Self::PlatformUnavailable(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a rejection error carrying the platform's response
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }

    /// Create an invalid specification error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Whether retrying the same operation with a fresh read may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PlatformUnavailable(_) | Self::Conflict(_))
    }
}
