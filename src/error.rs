//! Error types for the monitoring core
//!
//! - `FetchError` aborts a single pass and leaves all state untouched.
//! - `NotifyError` is logged; state already committed for the pass stays committed.
//! - `ConfigError` is fatal and only raised before the loop starts.

/// Telemetry could not be obtained or was unusable
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure, including timeouts
    #[error("telemetry request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("telemetry endpoint returned HTTP {0}")]
    Status(u16),

    /// The body could not be decoded
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),

    /// The body decoded but a value is out of range
    #[error("invalid telemetry value for {field}: {value}")]
    Invalid { field: &'static str, value: f64 },
}

/// A notification could not be delivered
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build email: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Configuration is missing or invalid
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required configuration fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
