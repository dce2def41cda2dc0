//! Live-query synchronization state machine.
//!
//! [`SyncState`] owns one subscription's result cache and applies exactly one
//! inbound event per call, in arrival order. It performs no I/O and never
//! notifies listeners; callers dispatch after a mutation has completed.
//!
//! Exactly one cache is authoritative per mode:
//! - normal / findOne: the ordered document list (count is its length)
//! - count: the counter
//! - distinct: the value set (count is its size)

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::document::{Document, DocumentId, SharedDocument};
use crate::error::WireError;
use crate::query::QueryMode;

use super::event::{DistinctDelta, InitialResult, LiveEvent, ResultIndex};

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The cache changed.
    Changed,
    /// Valid event that required no change (e.g. update for an excluded doc).
    Unchanged,
    /// Remove for a document that is not cached.
    NotFound,
    /// Event kind does not apply to this query mode.
    Ignored,
}

impl Applied {
    /// Returns false only for a remove miss.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Result of handing an event to [`SyncState::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// Applied immediately with the given outcome.
    Applied(Applied),
    /// Held until the initial response seeds the cache.
    Buffered,
}

/// Initial-sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Waiting for the initial response.
    Pending,
    /// Seeded; events apply immediately.
    Synced,
}

/// Insertion-ordered set of distinct scalar values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistinctSet(IndexMap<String, JsonValue>);

impl DistinctSet {
    fn key(value: &JsonValue) -> String {
        value.to_string()
    }

    /// Set of `values` in first-seen order.
    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = JsonValue>) -> Self {
        let mut set = Self::default();
        for v in values {
            set.0.entry(Self::key(&v)).or_insert(v);
        }
        set
    }

    /// `(values ∪ add) \ remove`, add first, so a value in both ends up excluded.
    ///
    /// Returns true if the set changed.
    pub fn apply(&mut self, delta: &DistinctDelta) -> bool {
        let mut added = Vec::new();
        for v in &delta.add {
            let key = Self::key(v);
            if !self.0.contains_key(&key) {
                self.0.insert(key.clone(), v.clone());
                added.push(key);
            }
        }
        let mut dropped_existing = false;
        for v in &delta.remove {
            let key = Self::key(v);
            if self.0.shift_remove(&key).is_some() && !added.contains(&key) {
                dropped_existing = true;
            }
        }
        // a value added and removed by the same delta is no change
        dropped_existing || added.iter().any(|key| self.0.contains_key(key))
    }

    /// True if `value` is in the set.
    #[must_use]
    pub fn contains(&self, value: &JsonValue) -> bool {
        self.0.contains_key(&Self::key(value))
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the set holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &JsonValue> {
        self.0.values()
    }
}

/// The authoritative cache for a mode.
#[derive(Debug, Clone)]
pub enum ResultSet {
    /// Normal and findOne modes, in result order.
    Documents(Vec<SharedDocument>),
    /// Count mode.
    Count(i64),
    /// Distinct mode.
    Distinct(DistinctSet),
}

impl ResultSet {
    fn empty_for(mode: QueryMode) -> Self {
        match mode {
            QueryMode::Count => Self::Count(0),
            QueryMode::Distinct => Self::Distinct(DistinctSet::default()),
            QueryMode::Normal { .. } | QueryMode::FindOne => Self::Documents(Vec::new()),
        }
    }
}

/// Per-subscription cache and sync phase.
#[derive(Debug, Clone)]
pub struct SyncState {
    mode: QueryMode,
    results: ResultSet,
    phase: SyncPhase,
    buffered: VecDeque<LiveEvent>,
}

impl SyncState {
    /// Empty cache for `mode`, waiting for its initial response.
    #[must_use]
    pub fn new(mode: QueryMode) -> Self {
        Self {
            mode,
            results: ResultSet::empty_for(mode),
            phase: SyncPhase::Pending,
            buffered: VecDeque::new(),
        }
    }

    /// Query mode this cache was built for.
    #[must_use]
    pub const fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Current initial-sync phase.
    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Raw cache contents.
    #[must_use]
    pub const fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Events held until the seed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Cached documents (empty outside normal/findOne mode).
    #[must_use]
    pub fn docs(&self) -> Vec<SharedDocument> {
        match &self.results {
            ResultSet::Documents(docs) => docs.clone(),
            _ => Vec::new(),
        }
    }

    /// First cached document; the result of a findOne query.
    #[must_use]
    pub fn doc(&self) -> Option<SharedDocument> {
        match &self.results {
            ResultSet::Documents(docs) => docs.first().cloned(),
            _ => None,
        }
    }

    /// Cached document with `_id == id`.
    #[must_use]
    pub fn doc_by_id(&self, id: &DocumentId) -> Option<SharedDocument> {
        match &self.results {
            ResultSet::Documents(docs) => docs.iter().find(|d| d.has_id(id)).cloned(),
            _ => None,
        }
    }

    /// Authoritative in count mode, derived otherwise.
    #[must_use]
    pub fn count(&self) -> i64 {
        match &self.results {
            ResultSet::Count(n) => *n,
            ResultSet::Documents(docs) => i64::try_from(docs.len()).unwrap_or(i64::MAX),
            ResultSet::Distinct(set) => i64::try_from(set.len()).unwrap_or(i64::MAX),
        }
    }

    /// Distinct values (empty outside distinct mode).
    #[must_use]
    pub fn values(&self) -> Vec<JsonValue> {
        match &self.results {
            ResultSet::Distinct(set) => set.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Drop all cached state and return to `Pending` (used before a replay).
    pub fn reset(&mut self) {
        self.results = ResultSet::empty_for(self.mode);
        self.phase = SyncPhase::Pending;
        self.buffered.clear();
    }

    /// Accept an inbound event.
    ///
    /// Count deltas apply immediately in every phase since the initial count is
    /// added, not assigned. Other events wait for the initial response so the
    /// snapshot cannot overwrite them.
    pub fn receive(&mut self, event: LiveEvent) -> Reception {
        if self.phase == SyncPhase::Pending && !self.mode.is_count() {
            self.buffered.push_back(event);
            return Reception::Buffered;
        }
        Reception::Applied(self.apply(&event))
    }

    /// Seed the cache from the initial response, then apply buffered events in
    /// arrival order. Returns the applied buffered events for dispatch.
    pub fn seed(&mut self, initial: InitialResult) -> Result<Vec<(LiveEvent, Applied)>, WireError> {
        match (&mut self.results, initial) {
            (ResultSet::Count(count), InitialResult::Count(n)) => {
                *count += n;
            }
            (ResultSet::Documents(docs), InitialResult::Docs(seeded)) => {
                *docs = seeded.into_iter().map(SharedDocument::new).collect();
            }
            (ResultSet::Distinct(set), InitialResult::Values(values)) => {
                *set = DistinctSet::from_values(values);
            }
            (_, other) => {
                return Err(WireError::malformed(
                    "liveQuery response",
                    format!("response {other:?} does not match mode {:?}", self.mode),
                ));
            }
        }
        self.phase = SyncPhase::Synced;

        let mut applied = Vec::with_capacity(self.buffered.len());
        while let Some(event) = self.buffered.pop_front() {
            let outcome = self.apply(&event);
            applied.push((event, outcome));
        }
        Ok(applied)
    }

    /// Apply one event regardless of phase.
    pub fn apply(&mut self, event: &LiveEvent) -> Applied {
        match event {
            LiveEvent::Add { doc, index } => self.add(doc, *index),
            LiveEvent::Update { doc, index } => self.update(doc, *index),
            LiveEvent::Remove { id } => self.remove(id),
            LiveEvent::DistinctSync(delta) => self.distinct_sync(delta),
        }
    }

    /// Insert `doc` at `index` (append when `None`), keeping the limit.
    ///
    /// Count mode increments; distinct mode ignores the event.
    pub fn add(&mut self, doc: &Document, index: Option<usize>) -> Applied {
        let mode = self.mode;
        match &mut self.results {
            ResultSet::Count(count) => {
                *count += 1;
                Applied::Changed
            }
            ResultSet::Documents(docs) if mode == QueryMode::FindOne => {
                match docs.first() {
                    Some(current) => current.replace(doc.clone()),
                    None => docs.push(SharedDocument::new(doc.clone())),
                }
                docs.truncate(1);
                Applied::Changed
            }
            ResultSet::Documents(docs) => {
                insert_capped(docs, SharedDocument::new(doc.clone()), index, mode.limit());
                Applied::Changed
            }
            ResultSet::Distinct(_) => {
                tracing::warn!(doc_id = ?doc.id(), "add event ignored by distinct query");
                Applied::Ignored
            }
        }
    }

    /// Merge, move, insert or drop `doc` according to its new result index.
    pub fn update(&mut self, doc: &Document, index: ResultIndex) -> Applied {
        let mode = self.mode;
        let docs = match &mut self.results {
            ResultSet::Count(count) => {
                if index == ResultIndex::Absent {
                    *count -= 1;
                } else {
                    *count += 1;
                }
                return Applied::Changed;
            }
            ResultSet::Distinct(_) => {
                tracing::warn!(doc_id = ?doc.id(), "update event ignored by distinct query");
                return Applied::Ignored;
            }
            ResultSet::Documents(docs) => docs,
        };

        let position = doc
            .id()
            .and_then(|id| docs.iter().position(|d| d.has_id(&id)));

        match (position, index) {
            (Some(current), ResultIndex::Excluded | ResultIndex::Absent) => {
                docs.remove(current);
                Applied::Changed
            }
            (Some(current), ResultIndex::At(target)) if current == target => {
                docs[current].merge(doc.clone());
                Applied::Changed
            }
            (Some(current), ResultIndex::At(target)) => {
                // Target is relative to the list with the old slot already removed.
                let moved = docs.remove(current);
                moved.merge(doc.clone());
                let target = target.min(docs.len());
                docs.insert(target, moved);
                Applied::Changed
            }
            (None, ResultIndex::At(target)) => {
                insert_capped(docs, SharedDocument::new(doc.clone()), Some(target), mode.limit());
                Applied::Changed
            }
            (None, ResultIndex::Excluded | ResultIndex::Absent) => {
                tracing::debug!(doc_id = ?doc.id(), "updated document is not cached and not in result");
                Applied::Unchanged
            }
        }
    }

    /// Remove the cached document `id`; `NotFound` if it is not cached.
    pub fn remove(&mut self, id: &DocumentId) -> Applied {
        match &mut self.results {
            ResultSet::Count(count) => {
                *count -= 1;
                Applied::Changed
            }
            ResultSet::Documents(docs) => match docs.iter().position(|d| d.has_id(id)) {
                Some(i) => {
                    docs.remove(i);
                    Applied::Changed
                }
                None => {
                    tracing::warn!(doc_id = %id, "failed to find deleted document");
                    Applied::NotFound
                }
            },
            ResultSet::Distinct(_) => {
                tracing::warn!(doc_id = %id, "remove event has no document to remove in distinct query");
                Applied::NotFound
            }
        }
    }

    /// Apply a distinct delta; other modes ignore it.
    pub fn distinct_sync(&mut self, delta: &DistinctDelta) -> Applied {
        match &mut self.results {
            ResultSet::Distinct(set) => {
                let changed = set.apply(delta);
                tracing::debug!(values = set.len(), "distinct sync applied");
                if changed {
                    Applied::Changed
                } else {
                    Applied::Unchanged
                }
            }
            _ => {
                tracing::warn!("distinctSync event ignored by non-distinct query");
                Applied::Ignored
            }
        }
    }
}

/// Insert at `index` when that slot is occupied, else append; then drop one
/// trailing element if the cap is exceeded. The inserted document is never
/// the one dropped.
fn insert_capped(
    docs: &mut Vec<SharedDocument>,
    doc: SharedDocument,
    index: Option<usize>,
    limit: Option<usize>,
) {
    let at = match index {
        Some(i) if i < docs.len() => {
            docs.insert(i, doc);
            i
        }
        _ => {
            docs.push(doc);
            docs.len() - 1
        }
    };

    if let Some(limit) = limit {
        if docs.len() > limit {
            let last = docs.len() - 1;
            let evict = if at == last { last - 1 } else { last };
            docs.remove(evict);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::ID_FIELD;

    fn doc(id: i64) -> Document {
        Document::new().with(ID_FIELD, id)
    }

    fn ids(state: &SyncState) -> Vec<i64> {
        state
            .docs()
            .iter()
            .map(|d| d.get(ID_FIELD).and_then(|v| v.as_i64()).unwrap())
            .collect()
    }

    fn synced(mode: QueryMode, docs: Vec<Document>) -> SyncState {
        let mut state = SyncState::new(mode);
        state.seed(InitialResult::Docs(docs)).unwrap();
        state
    }

    fn normal() -> QueryMode {
        QueryMode::Normal { limit: None }
    }

    #[test]
    fn add_inserts_at_occupied_slot() {
        let mut state = synced(normal(), vec![doc(1), doc(2)]);
        assert_eq!(state.add(&doc(3), Some(1)), Applied::Changed);
        assert_eq!(ids(&state), vec![1, 3, 2]);
        assert_eq!(state.count(), 3);
    }

    #[test]
    fn add_appends_when_slot_is_free() {
        let mut state = synced(normal(), vec![doc(1)]);
        state.add(&doc(2), Some(5));
        state.add(&doc(3), None);
        assert_eq!(ids(&state), vec![1, 2, 3]);
    }

    #[test]
    fn add_with_limit_truncates_tail_not_inserted() {
        let mut state = synced(QueryMode::Normal { limit: Some(2) }, vec![doc(1), doc(2)]);
        state.add(&doc(3), Some(1));
        assert_eq!(ids(&state), vec![1, 3]);
        assert_eq!(state.count(), 2);
    }

    #[test]
    fn add_with_limit_keeps_appended_doc() {
        let mut state = synced(QueryMode::Normal { limit: Some(2) }, vec![doc(1), doc(2)]);
        state.add(&doc(3), None);
        assert_eq!(ids(&state), vec![1, 3]);
    }

    #[test]
    fn find_one_add_overwrites_in_place() {
        let mut state = synced(QueryMode::FindOne, vec![doc(1).with("x", 1)]);
        let held = state.doc().unwrap();
        state.add(&doc(2), Some(0));
        assert!(SharedDocument::ptr_eq(&held, &state.doc().unwrap()));
        assert_eq!(held.get(ID_FIELD), Some(json!(2)));
        assert_eq!(held.get("x"), None);
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn count_add_update_remove() {
        let mut state = SyncState::new(QueryMode::Count);
        state.seed(InitialResult::Count(3)).unwrap();
        state.add(&doc(1), None);
        assert_eq!(state.count(), 4);
        state.update(&doc(1), ResultIndex::Absent);
        assert_eq!(state.count(), 3);
        state.update(&doc(1), ResultIndex::At(7));
        assert_eq!(state.count(), 4);
        state.update(&doc(1), ResultIndex::Excluded);
        assert_eq!(state.count(), 5);
        assert_eq!(state.remove(&DocumentId::from(1)), Applied::Changed);
        assert_eq!(state.count(), 4);
    }

    #[test]
    fn count_deltas_commute_with_seed() {
        let mut state = SyncState::new(QueryMode::Count);
        assert_eq!(
            state.receive(LiveEvent::Remove { id: DocumentId::from(1) }),
            Reception::Applied(Applied::Changed)
        );
        assert_eq!(state.count(), -1);
        state.seed(InitialResult::Count(5)).unwrap();
        assert_eq!(state.count(), 4);
    }

    #[test]
    fn update_same_position_merges_in_place() {
        let mut state = synced(normal(), vec![doc(1).with("x", 1).with("y", "a")]);
        let held = state.doc().unwrap();
        state.update(&doc(1).with("x", 2), ResultIndex::At(0));
        let now = state.doc().unwrap();
        assert!(SharedDocument::ptr_eq(&held, &now));
        assert_eq!(held.get("x"), Some(json!(2)));
        assert_eq!(held.get("y"), Some(json!("a")));
    }

    #[test]
    fn update_false_removes() {
        let mut state = synced(normal(), vec![doc(1), doc(2)]);
        state.update(&doc(1), ResultIndex::Excluded);
        assert_eq!(ids(&state), vec![2]);
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn update_absent_for_cached_doc_removes() {
        let mut state = synced(normal(), vec![doc(1), doc(2), doc(3)]);
        assert_eq!(state.update(&doc(2), ResultIndex::Absent), Applied::Changed);
        assert_eq!(ids(&state), vec![1, 3]);
        assert!(state.doc_by_id(&DocumentId::from(2)).is_none());
    }

    #[test]
    fn update_moves_down_to_post_removal_index() {
        let mut state = synced(normal(), vec![doc(1), doc(2), doc(3)]);
        state.update(&doc(1), ResultIndex::At(2));
        assert_eq!(ids(&state), vec![2, 3, 1]);
    }

    #[test]
    fn update_moves_up() {
        let mut state = synced(normal(), vec![doc(1), doc(2), doc(3)]);
        let held = state.doc_by_id(&DocumentId::from(3)).unwrap();
        state.update(&doc(3).with("x", 9), ResultIndex::At(0));
        assert_eq!(ids(&state), vec![3, 1, 2]);
        assert!(SharedDocument::ptr_eq(&held, &state.doc().unwrap()));
        assert_eq!(held.get("x"), Some(json!(9)));
    }

    #[test]
    fn update_unknown_doc_newly_matching_is_inserted() {
        let mut state = synced(normal(), vec![doc(1), doc(2)]);
        state.update(&doc(3), ResultIndex::At(0));
        assert_eq!(ids(&state), vec![3, 1, 2]);
        state.update(&doc(4), ResultIndex::At(10));
        assert_eq!(ids(&state), vec![3, 1, 2, 4]);
    }

    #[test]
    fn update_unknown_doc_not_in_result_is_noop() {
        let mut state = synced(normal(), vec![doc(1)]);
        assert_eq!(state.update(&doc(3), ResultIndex::Absent), Applied::Unchanged);
        assert_eq!(state.update(&doc(3), ResultIndex::Excluded), Applied::Unchanged);
        assert_eq!(ids(&state), vec![1]);
    }

    #[test]
    fn remove_missing_reports_not_found_and_keeps_state() {
        let mut state = synced(normal(), vec![doc(1), doc(2)]);
        let outcome = state.remove(&DocumentId::from(9));
        assert_eq!(outcome, Applied::NotFound);
        assert!(!outcome.succeeded());
        assert_eq!(ids(&state), vec![1, 2]);
        assert_eq!(state.count(), 2);
    }

    #[test]
    fn duplicate_remove_is_tolerated() {
        let mut state = synced(normal(), vec![doc(1)]);
        assert_eq!(state.remove(&DocumentId::from(1)), Applied::Changed);
        assert_eq!(state.remove(&DocumentId::from(1)), Applied::NotFound);
        assert_eq!(state.count(), 0);
    }

    #[test]
    fn distinct_empty_delta_is_noop() {
        let mut state = SyncState::new(QueryMode::Distinct);
        state.seed(InitialResult::Values(vec![json!("a"), json!("b")])).unwrap();
        assert_eq!(state.distinct_sync(&DistinctDelta::default()), Applied::Unchanged);
        assert_eq!(state.values(), vec![json!("a"), json!("b")]);
    }

    #[test]
    fn distinct_add_then_subtract() {
        let mut state = SyncState::new(QueryMode::Distinct);
        state.seed(InitialResult::Values(vec![json!("a")])).unwrap();
        let delta = DistinctDelta {
            add: vec![json!("b"), json!("c")],
            remove: vec![json!("c"), json!("a")],
        };
        state.distinct_sync(&delta);
        assert_eq!(state.values(), vec![json!("b")]);
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn distinct_set_reports_net_change_only() {
        let mut set = DistinctSet::from_values(vec![json!("a")]);
        let transient = DistinctDelta {
            add: vec![json!("z")],
            remove: vec![json!("z")],
        };
        assert!(!set.apply(&transient));
        assert!(!set.apply(&DistinctDelta {
            add: vec![json!("a")],
            remove: vec![json!("missing")],
        }));
        assert!(set.apply(&DistinctDelta {
            add: vec![],
            remove: vec![json!("a")],
        }));
        assert!(set.is_empty());
        assert!(set.apply(&DistinctDelta {
            add: vec![json!(1)],
            remove: vec![],
        }));
        assert!(set.contains(&json!(1)));
    }

    #[test]
    fn distinct_inverse_delta_restores_untouched_values() {
        let original = vec![json!(1), json!(2), json!(3)];
        let mut state = SyncState::new(QueryMode::Distinct);
        state.seed(InitialResult::Values(original.clone())).unwrap();

        let a = vec![json!(4), json!(5)];
        let r = vec![json!(5), json!(6)];
        state.distinct_sync(&DistinctDelta { add: a.clone(), remove: r.clone() });
        state.distinct_sync(&DistinctDelta { add: r.clone(), remove: a.clone() });

        // (original ∪ R) \ A: the overlap value 5 ends up excluded.
        let values = state.values();
        for v in &original {
            assert!(values.contains(v), "value {v}");
        }
        assert!(!values.contains(&json!(4)));
        assert!(!values.contains(&json!(5)));
        assert!(values.contains(&json!(6)));
    }

    #[test]
    fn pending_doc_events_are_buffered_until_seed() {
        let mut state = SyncState::new(normal());
        assert_eq!(
            state.receive(LiveEvent::Add { doc: doc(3), index: None }),
            Reception::Buffered
        );
        assert_eq!(state.buffered_len(), 1);
        assert!(state.docs().is_empty());

        let applied = state.seed(InitialResult::Docs(vec![doc(1), doc(2)])).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1, Applied::Changed);
        assert_eq!(ids(&state), vec![1, 2, 3]);
        assert_eq!(state.phase(), SyncPhase::Synced);
    }

    #[test]
    fn seed_with_mismatched_shape_fails() {
        let mut state = SyncState::new(QueryMode::Count);
        assert!(state.seed(InitialResult::Docs(Vec::new())).is_err());
        assert_eq!(state.phase(), SyncPhase::Pending);
    }

    #[test]
    fn reset_clears_cache_and_phase() {
        let mut state = synced(normal(), vec![doc(1)]);
        state.reset();
        assert_eq!(state.count(), 0);
        assert_eq!(state.phase(), SyncPhase::Pending);
    }

    #[test]
    fn events_consistent_with_server_state_match_materialized_result() {
        // Server result evolves: [1,2] -> add 3@1 -> [1,3,2] -> update 1 to idx 2 -> [3,2,1]
        // -> remove 2 -> [3,1] -> update 4 newly matching at 0 -> [4,3,1]
        let mut state = synced(normal(), vec![doc(1), doc(2)]);
        state.apply(&LiveEvent::Add { doc: doc(3), index: Some(1) });
        state.apply(&LiveEvent::Update { doc: doc(1), index: ResultIndex::At(2) });
        state.apply(&LiveEvent::Remove { id: DocumentId::from(2) });
        state.apply(&LiveEvent::Update { doc: doc(4), index: ResultIndex::At(0) });
        assert_eq!(ids(&state), vec![4, 3, 1]);
        assert_eq!(state.count(), 3);
    }
}
