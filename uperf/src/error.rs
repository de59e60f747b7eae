use std::net::SocketAddr;

use thiserror::Error;
use uperf_common::OperationCode;

/// Main error type for uperf operations
#[derive(Error, Debug)]
pub enum UperfError {
    /// Unknown operation code, unknown config key or malformed arguments
    #[error("Protocol error: {message}")]
    Protocol { message: String, code: Option<u16> },

    /// A SET_* or config value has the wrong type or is out of range
    #[error("Config mismatch for '{name}': expected {expected}, found {found}")]
    ConfigMismatch {
        name: String,
        expected: &'static str,
        found: String,
    },

    /// A remote call did not complete within its budget
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout {
        operation: OperationCode,
        duration_ms: u64,
    },

    /// The remote dispatcher answered with a failure
    #[error("Remote failure from {member}: {message}")]
    Remote { member: SocketAddr, message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Message serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cluster configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Node state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// I/O errors (wrapper for `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors from cluster files and report export
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors for unexpected conditions
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl UperfError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            code: None,
        }
    }
    #[must_use]
    pub fn unknown_operation(code: u16) -> Self {
        Self::Protocol {
            message: format!("method with id={code} not found"),
            code: Some(code),
        }
    }
    pub fn config_mismatch(
        name: impl Into<String>,
        expected: &'static str,
        found: impl Into<String>,
    ) -> Self {
        Self::ConfigMismatch {
            name: name.into(),
            expected,
            found: found.into(),
        }
    }
    #[must_use]
    pub const fn timeout(operation: OperationCode, duration_ms: u64) -> Self {
        Self::Timeout {
            operation,
            duration_ms,
        }
    }
    pub fn remote(member: SocketAddr, message: impl Into<String>) -> Self {
        Self::Remote {
            member,
            message: message.into(),
        }
    }
    pub fn network<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }
    pub fn network_msg(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }
    pub fn serialization<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for uperf operations
pub type Result<T, E = UperfError> = std::result::Result<T, E>;
