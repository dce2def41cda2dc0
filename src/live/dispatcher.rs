//! Per-live-query listener registry.
//!
//! Listeners run most-recently-registered first; the event-specific list runs
//! to completion before the `any` list. The first failing listener aborts the
//! pass and its error is returned to whoever delivered the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::MirrorError;
use crate::registry::LiveQueryId;

use super::event::{EventKind, Notification};

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered callback.
pub type Listener = Arc<dyn Fn(&Notification) -> Result<(), ListenerError> + Send + Sync>;

type ListenerTable = HashMap<EventKind, Vec<(u64, Listener)>>;

/// Listener lists for one live query.
#[derive(Default)]
pub struct EventDispatcher {
    next_listener: AtomicU64,
    listeners: Arc<Mutex<ListenerTable>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<EventKind, usize> = table.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventDispatcher").field("listeners", &counts).finish()
    }
}

impl EventDispatcher {
    /// Empty listener table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));

        ListenerHandle {
            kind,
            id,
            table: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        let table = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Invoke listeners for `notification`.
    ///
    /// The listener table is not locked while callbacks run, so a callback may
    /// register or unregister listeners; such changes apply from the next pass.
    pub fn dispatch(&self, lq_id: LiveQueryId, notification: &Notification) -> Result<(), MirrorError> {
        let kind = notification.kind();
        tracing::debug!(lq_id = %lq_id, event = %kind, "invoking listeners");

        for list_kind in [kind, EventKind::Any] {
            for listener in self.snapshot(list_kind).iter().rev() {
                if let Err(err) = listener(notification) {
                    tracing::error!(
                        lq_id = %lq_id,
                        event = %kind,
                        list = %list_kind,
                        error = %err,
                        "live query listener failed"
                    );
                    return Err(MirrorError::ListenerFailure {
                        kind,
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Unsubscribe capability returned by [`EventDispatcher::on`].
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    kind: EventKind,
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl ListenerHandle {
    /// Event kind the listener was registered for.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener. Returns true only for the call that removed it.
    pub fn unsubscribe(&self) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = table.get_mut(&self.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        list.len() < before
    }
}
