//! Engine Error Types
//!
//! This module defines the error taxonomy for the collaboration engine.
//! The split mirrors how failures are handled: protocol errors are logged
//! and dropped per message, timeouts are transient and retried, and
//! entitlement errors are terminal until the user acts.
//!
//! # Error Categories
//!
//! - `Transport` - socket-level failure (connect, send, close)
//! - `Protocol` - malformed or unexpected envelope; never fatal
//! - `Entitlement` - ineligible reconnection; requires user action
//! - `Timeout` - connect handshake exceeded the deadline; transient
//! - `Reconciliation` - snapshot application failed; connection survives
//! - `Storage` - persisted local state could not be read or written
use thiserror::Error;

/// Errors produced by the collaboration engine
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// Socket-level failure
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable error message
        message: String,
    },

    /// Malformed or unexpected envelope
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable error message
        message: String,
    },

    /// Reconnection or collaboration refused for lack of entitlement
    #[error("entitlement required: {message}")]
    Entitlement {
        /// Human-readable error message
        message: String,
    },

    /// Connect handshake exceeded its deadline
    #[error("connect timed out after {seconds}s")]
    Timeout {
        /// Deadline that was exceeded, in seconds
        seconds: u64,
    },

    /// A sync snapshot could not be applied
    #[error("reconciliation error: {message}")]
    Reconciliation {
        /// Human-readable error message
        message: String,
    },

    /// Persisted local state could not be read or written
    #[error("storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },
}

impl EngineError {
    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new entitlement error
    pub fn entitlement(message: impl Into<String>) -> Self {
        Self::Entitlement {
            message: message.into(),
        }
    }

    /// Create a new reconciliation error
    pub fn reconciliation(message: impl Into<String>) -> Self {
        Self::Reconciliation {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether the failure is transient and safe to retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(format!("JSON error: {}", err))
    }
}
