//! Error types for the helpwatch runtime.

/// Top-level error type for the listener and escalation runtime.
#[derive(Debug, thiserror::Error)]
pub enum HelpError {
    /// Configuration file or value error.
    #[error("config error: {0}")]
    Config(String),

    /// Settings store read/write error.
    #[error("settings store error: {0}")]
    Store(String),

    /// An external capability (SMS, call, recorder, ...) failed.
    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by an injected capability.
///
/// The variant decides how the caller degrades: permission problems switch to
/// a documented fallback, everything else skips the single step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The platform refused the action for lack of a permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The resource (device, service, network) is not available right now.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The action was attempted and failed.
    #[error("failed: {0}")]
    Failed(String),
}

impl CapabilityError {
    /// Whether the failure was caused by a missing permission.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HelpError>;
