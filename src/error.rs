//! Error types for livemirror.
//!
//! All errors are strongly typed using thiserror so callers can pattern
//! match on the condition that occurred. Failures of push-event processing
//! never have a waiting caller; they are logged and only listener failures
//! are returned to the transport glue.

use thiserror::Error;

use crate::live::EventKind;
use crate::registry::LiveQueryId;

/// Validation errors raised while finalizing or executing a query descriptor.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `count` and `sort` were combined in one descriptor.
    #[error("count and sort must not be used on the same query")]
    CountWithSort,

    #[error("Query operation method cannot be empty")]
    EmptyMethod,

    #[error("Invalid limit {value}: limit must be greater than zero")]
    InvalidLimit { value: i64 },

    #[error("Required field '{field}' is missing")]
    MissingField { field: String },
}

/// Transport errors for client-server communication.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Failed to serialize request: {message}")]
    SerializationFailed { message: String },

    #[error("Remote method '{method}' failed: {message}")]
    Remote { method: String, message: String },

    #[error("Transport closed")]
    Closed,
}

/// Malformed payloads received from the remote peer.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Unknown push method '{method}'")]
    UnknownMethod { method: String },

    #[error("Push method '{method}' expects {expected} arguments, got {actual}")]
    Arity {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid live query id: {value}")]
    InvalidId { value: String },

    #[error("Malformed payload for '{context}': {message}")]
    Malformed { context: String, message: String },
}

impl WireError {
    pub(crate) fn malformed(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Top-level error type for livemirror.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// An event referenced a subscription id with no local live query.
    #[error("Unknown live query subscription {id}")]
    UnknownSubscription { id: LiveQueryId },

    /// `stop` was called before the first execution assigned an id.
    #[error("Live query must be executed before it can be stopped")]
    StopBeforeExecution,

    /// A registered listener returned an error; remaining listeners were skipped.
    #[error("Listener for '{kind}' failed: {message}")]
    ListenerFailure { kind: EventKind, message: String },

    #[error("Channel disconnected: {path}")]
    Disconnected { path: String },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MirrorError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this error came from a listener callback.
    #[must_use]
    pub const fn is_listener_failure(&self) -> bool {
        matches!(self, Self::ListenerFailure { .. })
    }

    /// Returns true if this error is recovered by replaying on reconnect.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::ConnectionFailed { .. } | TransportError::Closed)
        )
    }
}

/// Result type alias for livemirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

pub(crate) fn lock_err(context: &'static str) -> MirrorError {
    MirrorError::internal(format!("poisoned lock: {context}"))
}
