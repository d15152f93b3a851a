//! Error types for transport selection and reachability

use thiserror::Error;

/// Errors from opening a transport or probing an endpoint
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport name not compiled in or unknown
    #[error("unknown transport '{0}' (see list-transports)")]
    UnknownTransport(String),

    /// Malformed transport specification
    #[error("invalid parameter format: '{0}' (expected key=value)")]
    BadFormat(String),

    /// Parameter with a value the transport cannot use
    #[error("invalid value '{value}' for {transport} parameter '{key}': {reason}")]
    InvalidParam {
        transport: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Parameter the transport does not know
    #[error("{transport} does not accept parameter '{key}'")]
    UnknownParam { transport: String, key: String },

    /// Endpoint that cannot be handed to the probe
    #[error("invalid endpoint address '{0}'")]
    InvalidHost(String),

    /// Probe could not be run at all
    #[error("failed to run reachability probe: {0}")]
    Probe(#[from] std::io::Error),

    /// Endpoint never answered
    #[error("{host} unreachable after {attempts} attempts")]
    Unreachable { host: String, attempts: u32 },

    /// Register map or board error
    #[error(transparent)]
    Core(#[from] pwrctl_core::Error),
}

/// Result type for link operations
pub type Result<T> = core::result::Result<T, LinkError>;
