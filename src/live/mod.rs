//! Live queries.
//!
//! A [`LiveQuery`] is a cheap, cloneable handle to one subscription. Its
//! cache is owned by a [`SyncState`] behind a mutex that is held only for the
//! synchronous mutation: never across an `.await`, never while listeners run.
//! When the model registry is needed as well it is always locked first.

mod dispatcher;
mod event;
mod stream;
mod sync;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde_json::{json, Value as JsonValue};

use crate::document::{DocumentId, SharedDocument};
use crate::error::{lock_err, MirrorError, MirrorResult};
use crate::model::Model;
use crate::query::{DescriptorKey, QueryDescriptor};
use crate::reconnect::{ConnectionSignal, ReconnectPolicy};
use crate::registry::LiveQueryId;
use crate::wire;

pub use dispatcher::{EventDispatcher, Listener, ListenerError, ListenerHandle};
pub use event::{DistinctDelta, EventKind, InitialResult, LiveEvent, Notification, ResultIndex};
pub use stream::LiveQueryStream;
pub use sync::{Applied, DistinctSet, Reception, ResultSet, SyncPhase, SyncState};

/// What happened to a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Applied to the cache and dispatched to listeners.
    Applied(Applied),
    /// Held until the initial response arrives.
    Buffered,
    /// No live query is registered under the event's id.
    Dropped,
}

#[derive(Debug, Default)]
struct LiveQueryState {
    sync: Option<SyncState>,
    stopped: bool,
    live: bool,
    /// `stop` was requested or the first execution failed; the query never
    /// replays again.
    unsubscribed: bool,
    /// An initial response has been applied at least once.
    synced: bool,
    policy: Option<ReconnectPolicy>,
}

struct LiveQueryInner {
    model: Model,
    descriptor: QueryDescriptor,
    key: DescriptorKey,
    id: OnceLock<LiveQueryId>,
    state: Mutex<LiveQueryState>,
    events: EventDispatcher,
}

/// Handle to a live subscription of one model.
#[derive(Clone)]
pub struct LiveQuery {
    inner: Arc<LiveQueryInner>,
}

impl fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQuery")
            .field("model", &self.inner.model.name())
            .field("id", &self.id())
            .field("key", &self.inner.key)
            .field("stopped", &self.is_stopped())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl LiveQuery {
    pub(crate) fn new(model: Model, descriptor: QueryDescriptor) -> Self {
        let key = descriptor.key();
        Self {
            inner: Arc::new(LiveQueryInner {
                model,
                descriptor,
                key,
                id: OnceLock::new(),
                state: Mutex::new(LiveQueryState::default()),
                events: EventDispatcher::new(),
            }),
        }
    }

    /// Subscription id; `None` until the first execution.
    #[must_use]
    pub fn id(&self) -> Option<LiveQueryId> {
        self.inner.id.get().copied()
    }

    /// Query this live query subscribes to.
    #[must_use]
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.inner.descriptor
    }

    /// Dedup key of the descriptor.
    #[must_use]
    pub fn key(&self) -> &DescriptorKey {
        &self.inner.key
    }

    /// Owning model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    pub(crate) fn assign_id(&self, id: LiveQueryId) {
        if self.inner.id.set(id).is_err() {
            tracing::warn!(lq_id = %id, "live query already has an id");
        }
    }

    /// True if both handles refer to the same live query.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> MirrorResult<MutexGuard<'_, LiveQueryState>> {
        self.inner.state.lock().map_err(|_| lock_err("live query state"))
    }

    fn read<T: Default>(&self, f: impl FnOnce(&SyncState) -> T) -> T {
        self.state()
            .ok()
            .and_then(|state| state.sync.as_ref().map(f))
            .unwrap_or_default()
    }

    /// Cached documents in result order.
    #[must_use]
    pub fn docs(&self) -> Vec<SharedDocument> {
        self.read(SyncState::docs)
    }

    /// The single result of a findOne query (first cached document otherwise).
    #[must_use]
    pub fn doc(&self) -> Option<SharedDocument> {
        self.read(SyncState::doc)
    }

    /// Cached document with `_id == id`.
    #[must_use]
    pub fn doc_by_id(&self, id: &DocumentId) -> Option<SharedDocument> {
        self.read(|sync| sync.doc_by_id(id))
    }

    /// Remote count in count mode, otherwise the number of cached entries.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.read(SyncState::count)
    }

    /// Values of a distinct query.
    #[must_use]
    pub fn values(&self) -> Vec<JsonValue> {
        self.read(SyncState::values)
    }

    /// True after `stop`, a disconnect or a failed execution.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state().map(|s| s.stopped).unwrap_or(true)
    }

    /// True once the initial response was applied and until a disconnect.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state().map(|s| s.live).unwrap_or(false)
    }

    /// True once the cache has been seeded.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.read(|sync| sync.phase() == SyncPhase::Synced)
    }

    /// Replay policy fixed at first execution.
    #[must_use]
    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.state().ok().and_then(|s| s.policy)
    }

    /// Register a listener for `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Bounded pull-style receiver of every notification of this query.
    ///
    /// Available once the query has an id.
    pub fn stream(&self) -> MirrorResult<LiveQueryStream> {
        let id = self.id().ok_or(MirrorError::StopBeforeExecution)?;
        let capacity = self.inner.model.config().stream_capacity;
        Ok(LiveQueryStream::attach(id, &self.inner.events, capacity))
    }

    /// Register and subscribe.
    ///
    /// If an active live query with the same descriptor exists in this model,
    /// that one is returned and nothing is sent. Otherwise the id is assigned
    /// and registered before the `liveQuery` call, so events pushed while the
    /// initial response is in flight are routed (and buffered) here.
    ///
    /// Executing an already registered query re-syncs it under its id.
    pub async fn execute(&self) -> MirrorResult<LiveQuery> {
        let mode = self.inner.descriptor.mode()?;
        if self.id().is_some() {
            self.replay().await?;
            return Ok(self.clone());
        }

        let model = &self.inner.model;
        let existing = {
            let mut registry = model.registry()?;
            match registry.find_by_descriptor(&self.inner.key) {
                Some(existing) => Some(existing),
                None => {
                    {
                        let mut state = self.state()?;
                        state.sync = Some(SyncState::new(mode));
                        state.policy = Some(ReconnectPolicy::for_session(model.session()));
                    }
                    registry.register(self);
                    None
                }
            }
        };

        if let Some(existing) = existing {
            tracing::debug!(
                model = %model.name(),
                lq_id = ?existing.id(),
                "reusing live query with identical descriptor"
            );
            return Ok(existing);
        }

        tracing::debug!(model = %model.name(), lq_id = ?self.id(), key = %self.inner.key, "live query registered");
        self.sync_with_server().await?;
        Ok(self.clone())
    }

    /// Send `liveQuery`, seed the cache, then notify `init` and any events
    /// that arrived while the response was in flight.
    async fn sync_with_server(&self) -> MirrorResult<()> {
        let id = self
            .id()
            .ok_or_else(|| MirrorError::internal("live query synced before registration"))?;
        let mode = self.inner.descriptor.mode()?;
        let model = &self.inner.model;

        let args = vec![self.inner.descriptor.to_json(), json!(id.get())];
        let seeded = match model.call(wire::methods::LIVE_QUERY, args).await {
            Ok(response) => wire::decode_initial(mode, response).map_err(MirrorError::from),
            Err(err) => Err(err),
        };
        let initial = match seeded {
            Ok(initial) => initial,
            Err(err) => return Err(self.abandon(id, err)),
        };

        let buffered = {
            let mut state = self.state()?;
            if state.unsubscribed {
                tracing::debug!(model = %model.name(), lq_id = %id, "initial response after stop, discarded");
                return Ok(());
            }
            let sync = state.sync.get_or_insert_with(|| SyncState::new(mode));
            match sync.seed(initial.clone()) {
                Ok(buffered) => {
                    state.stopped = false;
                    state.live = true;
                    state.synced = true;
                    buffered
                }
                Err(err) => {
                    drop(state);
                    return Err(self.abandon(id, err.into()));
                }
            }
        };
        model.registry()?.restore_descriptor(id);
        tracing::debug!(model = %model.name(), lq_id = %id, buffered = buffered.len(), "live query synced");

        self.inner.events.dispatch(id, &Notification::Init(initial))?;
        for (event, _) in buffered {
            self.inner.events.dispatch(id, &Notification::Live(event))?;
        }
        Ok(())
    }

    /// Mark the query stopped after a failed `liveQuery` round trip.
    ///
    /// A query that never synced is also unregistered: the caller only saw the
    /// error, so nothing may replay it or dedup against it.
    fn abandon(&self, id: LiveQueryId, err: MirrorError) -> MirrorError {
        let model = &self.inner.model;
        tracing::warn!(model = %model.name(), lq_id = %id, error = %err, "live query execution failed");
        let never_synced = match self.state() {
            Ok(mut state) => {
                state.stopped = true;
                state.live = false;
                if !state.synced {
                    state.unsubscribed = true;
                }
                !state.synced
            }
            Err(lock) => return lock,
        };
        if never_synced {
            match model.registry() {
                Ok(mut registry) => {
                    registry.remove(id);
                }
                Err(lock) => return lock,
            }
        }
        err
    }

    /// Ask the remote peer to stop sending events.
    ///
    /// The query is marked stopped at once so it no longer deduplicates; local
    /// bookkeeping is dropped when the peer acknowledges. Events arriving in
    /// between are still routed and applied.
    pub async fn stop(&self) -> MirrorResult<()> {
        let id = self.id().ok_or(MirrorError::StopBeforeExecution)?;
        let model = &self.inner.model;
        {
            let registry = model.registry()?;
            if registry.get(id).is_none() {
                tracing::debug!(model = %model.name(), lq_id = %id, "live query already stopped");
                return Ok(());
            }
            let mut state = self.state()?;
            state.stopped = true;
            state.unsubscribed = true;
        }

        model.call(wire::methods::UNSUB_LQ, vec![json!(id.get())]).await?;

        let mut registry = model.registry()?;
        registry.remove(id);
        drop(registry);
        if let Ok(mut state) = self.state() {
            state.live = false;
        }
        tracing::debug!(model = %model.name(), lq_id = %id, "live query unsubscribed");
        Ok(())
    }

    /// Apply a pushed event and notify listeners.
    pub(crate) fn receive(&self, event: LiveEvent) -> MirrorResult<Delivery> {
        let id = self
            .id()
            .ok_or_else(|| MirrorError::internal("event routed to unregistered live query"))?;

        let reception = {
            let mut state = self.state()?;
            let Some(sync) = state.sync.as_mut() else {
                return Err(MirrorError::internal("event routed to live query without state"));
            };
            sync.receive(event.clone())
        };

        match reception {
            Reception::Buffered => {
                tracing::debug!(lq_id = %id, event = %event.kind(), "buffering event until initial sync");
                Ok(Delivery::Buffered)
            }
            Reception::Applied(applied) => {
                self.inner.events.dispatch(id, &Notification::Live(event))?;
                Ok(Delivery::Applied(applied))
            }
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        if let Ok(mut state) = self.state() {
            state.stopped = true;
            state.live = false;
        }
    }

    pub(crate) fn replays_on(&self, signal: ConnectionSignal) -> bool {
        self.state().is_ok_and(|s| {
            !s.unsubscribed && s.policy.is_some_and(|policy| policy.replays_on(signal))
        })
    }

    /// Clear the cache and re-execute under the same id.
    ///
    /// Returns false if the query was unsubscribed and did not replay.
    pub(crate) async fn replay(&self) -> MirrorResult<bool> {
        {
            let mut state = self.state()?;
            if state.unsubscribed {
                tracing::debug!(lq_id = ?self.id(), "skipping replay of unsubscribed live query");
                return Ok(false);
            }
            if let Some(sync) = state.sync.as_mut() {
                sync.reset();
            }
            state.live = false;
        }
        tracing::debug!(model = %self.inner.model.name(), lq_id = ?self.id(), "replaying live query");
        self.sync_with_server().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::client::Client;
    use crate::document::{Document, ID_FIELD};
    use crate::query::QueryChain;
    use crate::transport::MemoryTransport;

    fn setup() -> (Arc<MemoryTransport>, Model) {
        let transport = Arc::new(MemoryTransport::new());
        let client = Client::new(transport.clone());
        let model = client.model("fighter").unwrap();
        (transport, model)
    }

    fn doc(id: i64) -> Document {
        Document::new().with(ID_FIELD, id)
    }

    #[tokio::test]
    async fn execute_seeds_and_fires_init() {
        let (transport, model) = setup();
        transport.reply("MR.fighter.liveQuery", json!({"docs": [{"_id": 1}, {"_id": 2}]}));

        let lq = model.live_query().find(json!({})).build().unwrap();
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        lq.on(EventKind::Init, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let lq = lq.execute().await.unwrap();
        assert_eq!(lq.id(), Some(LiveQueryId::new(1)));
        assert_eq!(lq.count(), 2);
        assert!(lq.is_live());
        assert!(!lq.is_stopped());
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        let sent = transport.calls_to("MR.fighter.liveQuery");
        assert_eq!(sent[0][1], json!(1));
    }

    #[test]
    fn receive_before_seed_is_buffered() {
        let (_transport, model) = setup();
        let lq = model.live_query().find(json!({})).build().unwrap();
        let id = model.registry().unwrap().register(&lq);
        lq.state().unwrap().sync = Some(SyncState::new(crate::query::QueryMode::Normal { limit: None }));

        let delivery = lq.receive(LiveEvent::Add { doc: doc(5), index: None }).unwrap();
        assert_eq!(delivery, Delivery::Buffered);
        assert_eq!(lq.id(), Some(id));
        assert!(lq.docs().is_empty());
    }

    #[tokio::test]
    async fn failed_execution_marks_query_stopped() {
        let (transport, model) = setup();
        transport.fail(
            "MR.fighter.liveQuery",
            crate::error::TransportError::ConnectionFailed { message: "down".into() },
        );
        let lq = model.live_query().find(json!({})).build().unwrap();
        let err = lq.execute().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(lq.is_stopped());
        assert!(!lq.is_live());
        assert!(model.registry().unwrap().is_empty());
        assert!(!lq.replays_on(ConnectionSignal::Reconnect));
    }

    #[tokio::test]
    async fn failed_replay_keeps_synced_query_registered() {
        let (transport, model) = setup();
        transport.reply("MR.fighter.liveQuery", json!({"count": 3}));
        transport.fail(
            "MR.fighter.liveQuery",
            crate::error::TransportError::ConnectionFailed { message: "down".into() },
        );
        let lq = model.live_query().count().build().unwrap().execute().await.unwrap();
        let id = lq.id().unwrap();

        assert!(lq.replay().await.is_err());
        assert!(lq.is_stopped());
        assert!(model.registry().unwrap().get(id).is_some());
        assert!(lq.replays_on(ConnectionSignal::Reconnect));
    }

    #[test]
    fn stream_requires_an_id() {
        let (_transport, model) = setup();
        let lq = model.live_query().count().build().unwrap();
        assert!(matches!(lq.stream(), Err(MirrorError::StopBeforeExecution)));
    }
}
