//! Error types and handling for evbridge
//!
//! This module defines the error types used throughout the gateway. Every
//! kind is recovered inside the refresh core; the classification helpers
//! tell the scheduler whether a failure feeds the transient backoff or the
//! authentication lock.

use thiserror::Error;
use tokio::time::Instant;

/// Result type alias for evbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for evbridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Vendor call failed at the network level
    #[error("Network error: {message}")]
    Network { message: String },

    /// Vendor call did not answer in time
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Vendor API answered with an error
    #[error("API error: {message}")]
    Api { message: String },

    /// Credentials rejected or token expired beyond recovery
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Login is locked after repeated failures; no network call was made
    #[error("Authentication locked: {message}")]
    AuthLocked {
        message: String,
        locked_until: Instant,
    },

    /// Outward publish failed
    #[error("Publish error: {message}")]
    Publish { message: String },

    /// A collaborator failed while handling a dispatched call
    #[error("Integration error ({integration}): {message}")]
    Integration {
        integration: String,
        message: String,
    },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Refresh mode text that is not one of the known modes
    #[error("Unknown refresh mode: {value}")]
    UnknownRefreshMode { value: String },

    /// Operation not supported by the vendor client
    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl BridgeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        BridgeError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        BridgeError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        BridgeError::Api {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        BridgeError::Auth {
            message: message.into(),
        }
    }

    /// Create a new auth-locked error
    pub fn auth_locked<S: Into<String>>(message: S, locked_until: Instant) -> Self {
        BridgeError::AuthLocked {
            message: message.into(),
            locked_until,
        }
    }

    /// Create a new publish error
    pub fn publish<S: Into<String>>(message: S) -> Self {
        BridgeError::Publish {
            message: message.into(),
        }
    }

    /// Create a new integration error
    pub fn integration<S: Into<String>>(integration: S, message: S) -> Self {
        BridgeError::Integration {
            integration: integration.into(),
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        BridgeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new unsupported-operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        BridgeError::Unsupported {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BridgeError::Io {
            message: message.into(),
        }
    }

    /// Whether this failure should feed the scheduler's transient backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Network { .. }
                | BridgeError::Timeout { .. }
                | BridgeError::Api { .. }
                | BridgeError::Publish { .. }
        )
    }

    /// Whether this failure belongs to the authentication subsystem
    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::Auth { .. } | BridgeError::AuthLocked { .. })
    }

    /// Lock deadline carried by an auth-locked error
    pub fn locked_until(&self) -> Option<Instant> {
        match self {
            BridgeError::AuthLocked { locked_until, .. } => Some(*locked_until),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        BridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        BridgeError::timeout(err.to_string())
    }
}
