//! Per-collection facade.
//!
//! A [`Model`] names one remote collection. It issues the CRUD and query calls
//! for that collection, owns the live-query registry, and routes decoded push
//! events to the live query they belong to.

mod chain;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value as JsonValue;

use crate::config::ClientConfig;
use crate::document::{Document, ID_FIELD};
use crate::error::{lock_err, MirrorError, MirrorResult, ValidationError};
use crate::live::{Delivery, LiveQuery};
use crate::query::{QueryBuilder, QueryDescriptor};
use crate::reconnect::{ConnectionSignal, Session};
use crate::registry::{LiveQueryId, LiveQueryRegistry};
use crate::transport::Transport;
use crate::wire::{self, methods, PushEvent};

pub use chain::{ChainableLiveQuery, ChainableQuery};

struct ModelInner {
    name: String,
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    registry: Mutex<LiveQueryRegistry>,
}

/// Handle to one remote collection. Cloning is cheap.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.inner.name)
            .field("namespace", &self.inner.config.namespace)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub(crate) fn new(
        name: impl Into<String>,
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                name: name.into(),
                config,
                transport,
                session,
                registry: Mutex::new(LiveQueryRegistry::new()),
            }),
        }
    }

    /// Remote model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configuration inherited from the client.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    pub(crate) fn registry(&self) -> MirrorResult<MutexGuard<'_, LiveQueryRegistry>> {
        self.inner.registry.lock().map_err(|_| lock_err("live query registry"))
    }

    /// Call `<namespace>.<model>.<method>`.
    pub(crate) async fn call(&self, method: &str, args: Vec<JsonValue>) -> MirrorResult<JsonValue> {
        let full = self.inner.config.model_method(&self.inner.name, method);
        tracing::debug!(model = %self.inner.name, method = %full, "remote call");
        Ok(self.inner.transport.call(&full, args).await?)
    }

    /// Fully qualified push methods this model handles.
    #[must_use]
    pub fn push_methods(&self) -> Vec<String> {
        wire::PUSH_EVENTS
            .iter()
            .map(|event| self.inner.config.model_method(&self.inner.name, event))
            .collect()
    }

    /// Persist `doc` remotely.
    pub async fn save(&self, doc: Document) -> MirrorResult<JsonValue> {
        self.call(methods::SAVE, vec![doc.into_json()]).await
    }

    /// Apply `update` to every document matching `query`.
    pub async fn update(&self, query: JsonValue, update: JsonValue) -> MirrorResult<JsonValue> {
        self.call(methods::UPDATE, vec![query, update]).await
    }

    /// Create a new remote document from `doc`.
    pub async fn create(&self, doc: Document) -> MirrorResult<JsonValue> {
        self.call(methods::CREATE, vec![doc.into_json()]).await
    }

    /// Delete a document. It must carry an `_id`.
    pub async fn remove(&self, doc: &Document) -> MirrorResult<JsonValue> {
        let id = doc.id().ok_or_else(|| ValidationError::MissingField {
            field: ID_FIELD.to_string(),
        })?;
        self.call(methods::REMOVE, vec![id.as_json().clone()]).await
    }

    /// Field paths of the remote schema.
    pub async fn list_paths(&self) -> MirrorResult<JsonValue> {
        self.call(methods::LIST_PATHS, Vec::new()).await
    }

    /// Start a one-shot query chain.
    #[must_use]
    pub fn query(&self) -> ChainableQuery {
        ChainableQuery::new(self.clone(), QueryBuilder::new())
    }

    /// Start a live query chain.
    #[must_use]
    pub fn live_query(&self) -> ChainableLiveQuery {
        ChainableLiveQuery::new(self.clone(), QueryBuilder::new())
    }

    /// Stop `previous` and start a chain extending its descriptor.
    pub async fn live_query_from(&self, previous: &LiveQuery) -> MirrorResult<ChainableLiveQuery> {
        previous.stop().await?;
        Ok(ChainableLiveQuery::new(
            self.clone(),
            QueryBuilder::from_descriptor(previous.descriptor()),
        ))
    }

    /// Unexecuted live query for a ready-made descriptor.
    #[must_use]
    pub fn live_query_for(&self, descriptor: QueryDescriptor) -> LiveQuery {
        LiveQuery::new(self.clone(), descriptor)
    }

    /// Registered live query with id `id`.
    #[must_use]
    pub fn get(&self, id: LiveQueryId) -> Option<LiveQuery> {
        self.registry().ok().and_then(|registry| registry.get(id))
    }

    /// Registered live queries, ordered by id.
    #[must_use]
    pub fn live_queries(&self) -> Vec<LiveQuery> {
        self.registry().map(|registry| registry.live_queries()).unwrap_or_default()
    }

    /// Route a decoded push event. Unknown ids are logged and dropped.
    pub fn handle_push(&self, push: PushEvent) -> MirrorResult<Delivery> {
        match self.route(push.lq_id) {
            Ok(lq) => lq.receive(push.event),
            Err(err @ MirrorError::UnknownSubscription { .. }) => {
                tracing::warn!(
                    model = %self.inner.name,
                    event = %push.event.kind(),
                    error = %err,
                    "event dropped"
                );
                Ok(Delivery::Dropped)
            }
            Err(err) => Err(err),
        }
    }

    fn route(&self, id: LiveQueryId) -> MirrorResult<LiveQuery> {
        self.registry()?
            .get(id)
            .ok_or(MirrorError::UnknownSubscription { id })
    }

    pub(crate) fn on_disconnect(&self) -> MirrorResult<()> {
        let registered = self.registry()?.live_queries();
        for lq in &registered {
            lq.mark_disconnected();
        }
        tracing::debug!(model = %self.inner.name, live_queries = registered.len(), "disconnected");
        Ok(())
    }

    /// Replay every live query whose policy matches `signal`.
    ///
    /// A failed replay is logged and leaves that query stopped; the others
    /// still replay. Returns the number replayed.
    pub(crate) async fn replay_for(&self, signal: ConnectionSignal) -> MirrorResult<usize> {
        let due: Vec<LiveQuery> = self
            .registry()?
            .live_queries()
            .into_iter()
            .filter(|lq| lq.replays_on(signal))
            .collect();

        let mut replayed = 0;
        for lq in due {
            match lq.replay().await {
                Ok(true) => replayed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(model = %self.inner.name, lq_id = ?lq.id(), error = %err, "replay failed");
                    if !matches!(err, MirrorError::ListenerFailure { .. }) {
                        lq.mark_disconnected();
                    }
                }
            }
        }
        Ok(replayed)
    }
}
