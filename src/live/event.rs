//! Inbound live-query events.
//!
//! Push calls from the remote peer are decoded into the closed [`LiveEvent`]
//! union and matched explicitly by the sync engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::document::{Document, DocumentId};

/// Listener event kinds.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Remove,
    DistinctSync,
    /// First (or replayed) initial response has been applied.
    Init,
    /// Fired after the event-specific listeners of every event.
    Any,
}

impl EventKind {
    /// Wire / listener name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::DistinctSync => "distinctSync",
            Self::Init => "init",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position carried by an `update` push.
///
/// In count mode only the sign matters: `Absent` decrements, anything else increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultIndex {
    /// `false`: the document no longer matches the query.
    Excluded,
    /// A negative index (`-1`): the document is not in the result.
    Absent,
    /// The document's position in the post-update result set.
    At(usize),
}

/// Add/remove delta for a distinct query's value set.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistinctDelta {
    #[serde(default)]
    pub add: Vec<JsonValue>,
    #[serde(default)]
    pub remove: Vec<JsonValue>,
}

impl DistinctDelta {
    /// True if the delta neither adds nor removes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// A single inbound synchronization event.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A document entered the result set. `index: None` appends.
    Add { doc: Document, index: Option<usize> },
    /// A matched document changed.
    Update { doc: Document, index: ResultIndex },
    /// A document left the result set.
    Remove { id: DocumentId },
    /// Distinct value set delta.
    DistinctSync(DistinctDelta),
}

impl LiveEvent {
    /// Listener list this value is dispatched to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Add { .. } => EventKind::Add,
            Self::Update { .. } => EventKind::Update,
            Self::Remove { .. } => EventKind::Remove,
            Self::DistinctSync(_) => EventKind::DistinctSync,
        }
    }
}

/// Initial `liveQuery` response, already shaped by query mode.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum InitialResult {
    Docs(Vec<Document>),
    Count(i64),
    Values(Vec<JsonValue>),
}

/// What listeners are notified with.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A pushed event, after it was applied.
    Live(LiveEvent),
    /// The initial response, after seeding.
    Init(InitialResult),
}

impl Notification {
    /// Listener list this value is dispatched to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Live(event) => event.kind(),
            Self::Init(_) => EventKind::Init,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_names() {
        let ev = LiveEvent::Remove { id: DocumentId::from("x") };
        assert_eq!(ev.kind(), EventKind::Remove);
        assert_eq!(EventKind::DistinctSync.to_string(), "distinctSync");
        assert_eq!(Notification::Init(InitialResult::Count(0)).kind(), EventKind::Init);
    }

    #[test]
    fn distinct_delta_defaults_missing_sides() {
        let delta: DistinctDelta = serde_json::from_str(r#"{"add":[1]}"#).unwrap();
        assert_eq!(delta.add.len(), 1);
        assert!(delta.remove.is_empty());
        assert!(!delta.is_empty());
    }
}
