//! Replay decisions on transport reconnection.
//!
//! A live query created in an anonymous session replays as soon as the
//! transport reconnects. One created while authenticated waits for the
//! re-authentication signal, since the channel is anonymous until then and a
//! replay would return results for the wrong identity.

use std::sync::{PoisonError, RwLock};

use serde_json::Value as JsonValue;

/// Connection lifecycle signal delivered by the transport glue.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionSignal {
    Disconnect,
    Reconnect,
    AuthSuccess,
}

/// When a live query replays after the connection comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Replay right after `reconnect`.
    OnReconnect,
    /// Replay only after `authSuccess`.
    OnAuthSuccess,
}

impl ReconnectPolicy {
    /// Policy for a live query first executed in the given session.
    #[must_use]
    pub fn for_session(session: &Session) -> Self {
        if session.is_authenticated() {
            Self::OnAuthSuccess
        } else {
            Self::OnReconnect
        }
    }

    /// True if `signal` triggers a replay under this policy.
    #[must_use]
    pub const fn replays_on(self, signal: ConnectionSignal) -> bool {
        matches!(
            (self, signal),
            (Self::OnReconnect, ConnectionSignal::Reconnect)
                | (Self::OnAuthSuccess, ConnectionSignal::AuthSuccess)
        )
    }
}

/// Identity of the current connection.
#[derive(Debug, Default)]
pub struct Session {
    user: RwLock<Option<JsonValue>>,
}

impl Session {
    /// Anonymous session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True after a successful `authorize` and until `logout`.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// The user returned by the last successful authorization.
    #[must_use]
    pub fn user(&self) -> Option<JsonValue> {
        self.user.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record the user returned by a successful `authorize`.
    pub fn set_user(&self, user: JsonValue) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    /// Return to anonymous.
    pub fn clear(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
