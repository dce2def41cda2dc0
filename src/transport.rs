//! Transport seam.
//!
//! The RPC channel (socket handshake, auth, framing) lives outside this crate.
//! It is consumed through [`Transport`]: outbound calls by fully qualified
//! method name, and `expose` to publish the push methods the remote peer may
//! invoke. The glue that owns the socket feeds inbound push calls to
//! [`crate::Client::dispatch_push`] and lifecycle signals to
//! [`crate::Client::handle_signal`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::TransportError;

/// Outbound RPC channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke a remote method and wait for its result.
    async fn call(&self, method: &str, args: Vec<JsonValue>) -> Result<JsonValue, TransportError>;

    /// Make the given push methods callable by the remote peer.
    fn expose(&self, methods: &[String]);
}

/// One outbound call recorded by [`MemoryTransport`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub args: Vec<JsonValue>,
}

type Responder = Box<dyn Fn(&[JsonValue]) -> Result<JsonValue, TransportError> + Send + Sync>;

/// Scripted in-process transport.
///
/// Intended for tests and as a reference implementation. Each call first
/// consumes a queued one-shot reply for its method, then falls back to a
/// registered responder. Unscripted calls fail with `TransportError::Remote`.
#[derive(Default)]
pub struct MemoryTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<JsonValue, TransportError>>>>,
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<RecordedCall>>,
    exposed: Mutex<Vec<String>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("calls", &self.calls.lock().unwrap_or_else(PoisonError::into_inner).len())
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Transport with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for the next call to `method`.
    pub fn reply(&self, method: impl Into<String>, value: JsonValue) {
        self.queue(method.into(), Ok(value));
    }

    /// Queue a failure for the next call to `method`.
    pub fn fail(&self, method: impl Into<String>, err: TransportError) {
        self.queue(method.into(), Err(err));
    }

    fn queue(&self, method: String, reply: Result<JsonValue, TransportError>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method)
            .or_default()
            .push_back(reply);
    }

    /// Answer every call to `method` with `responder` once queued replies run out.
    pub fn respond_with<F>(&self, method: impl Into<String>, responder: F)
    where
        F: Fn(&[JsonValue]) -> Result<JsonValue, TransportError> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Box::new(responder));
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Argument lists of every call made to `method`.
    #[must_use]
    pub fn calls_to(&self, method: &str) -> Vec<Vec<JsonValue>> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.args)
            .collect()
    }

    /// Push methods exposed so far.
    #[must_use]
    pub fn exposed(&self) -> Vec<String> {
        self.exposed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn call(&self, method: &str, args: Vec<JsonValue>) -> Result<JsonValue, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                method: method.to_string(),
                args: args.clone(),
            });

        let queued = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }

        let responders = self.responders.lock().unwrap_or_else(PoisonError::into_inner);
        match responders.get(method) {
            Some(responder) => responder(&args),
            None => Err(TransportError::Remote {
                method: method.to_string(),
                message: "no reply scripted".to_string(),
            }),
        }
    }

    fn expose(&self, methods: &[String]) {
        self.exposed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(methods.iter().cloned());
    }
}
