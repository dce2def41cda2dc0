//! Per-model live query registry.
//!
//! One struct owns both indices so their invariants hold in one place:
//! - `by_id` is authoritative for routing pushed events;
//! - `by_descriptor` is authoritative for dedup and always points at an id
//!   present in `by_id`. An entry whose live query is stopped counts as absent
//!   and is evicted by the lookup that finds it.
//!
//! Ids start at 1 and are never reused, even after removal.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::live::LiveQuery;
use crate::query::DescriptorKey;

/// Subscription id of a live query, unique per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveQueryId(u64);

impl LiveQueryId {
    /// Wrap a raw wire id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id as sent on the wire.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LiveQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-model index of live queries by id and by descriptor.
#[derive(Debug, Default)]
pub struct LiveQueryRegistry {
    last_id: u64,
    by_id: HashMap<LiveQueryId, LiveQuery>,
    by_descriptor: HashMap<DescriptorKey, LiveQueryId>,
}

impl LiveQueryRegistry {
    /// Empty registry; the first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live query registered under `id`, stopped or not.
    #[must_use]
    pub fn get(&self, id: LiveQueryId) -> Option<LiveQuery> {
        self.by_id.get(&id).cloned()
    }

    /// Active live query registered for `key`, if any.
    pub fn find_by_descriptor(&mut self, key: &DescriptorKey) -> Option<LiveQuery> {
        let id = *self.by_descriptor.get(key)?;
        match self.by_id.get(&id) {
            Some(lq) if !lq.is_stopped() => Some(lq.clone()),
            _ => {
                tracing::debug!(lq_id = %id, "evicting stopped live query from descriptor index");
                self.by_descriptor.remove(key);
                None
            }
        }
    }

    /// Assign the next id to `lq` and index it under both keys.
    pub fn register(&mut self, lq: &LiveQuery) -> LiveQueryId {
        self.last_id += 1;
        let id = LiveQueryId(self.last_id);
        lq.assign_id(id);
        self.by_descriptor.insert(lq.key().clone(), id);
        self.by_id.insert(id, lq.clone());
        id
    }

    /// Point the descriptor index back at `id` unless another active query owns it.
    ///
    /// Returns true if the index now points at `id`.
    pub fn restore_descriptor(&mut self, id: LiveQueryId) -> bool {
        let Some(lq) = self.by_id.get(&id) else {
            return false;
        };
        let key = lq.key().clone();
        if let Some(current) = self.by_descriptor.get(&key).copied() {
            if current == id {
                return true;
            }
            if self.by_id.get(&current).is_some_and(|other| !other.is_stopped()) {
                return false;
            }
        }
        self.by_descriptor.insert(key, id);
        true
    }

    /// Drop bookkeeping for `id` (after the unsubscribe ack).
    pub fn remove(&mut self, id: LiveQueryId) -> Option<LiveQuery> {
        let lq = self.by_id.remove(&id)?;
        if self.by_descriptor.get(lq.key()) == Some(&id) {
            self.by_descriptor.remove(lq.key());
        }
        Some(lq)
    }

    /// Every registered live query, ordered by id.
    #[must_use]
    pub fn live_queries(&self) -> Vec<LiveQuery> {
        let mut ids: Vec<&LiveQueryId> = self.by_id.keys().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.by_id.get(id).cloned()).collect()
    }

    /// Number of registered queries, stopped ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Last id handed out (0 before the first registration).
    #[must_use]
    pub const fn last_id(&self) -> u64 {
        self.last_id
    }
}
