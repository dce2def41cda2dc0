//! Documents mirrored by live queries.
//!
//! A [`Document`] is a JSON object keyed by `_id`. Live queries hold
//! documents through [`SharedDocument`] handles: an in-place update mutates
//! the object behind the handle, so every holder of a clone observes the new
//! fields instead of holding a stale copy.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::WireError;

/// Name of the stable identity field.
pub const ID_FIELD: &str = "_id";

/// Stable document identity (the `_id` field).
///
/// Backends use strings (object ids) or numbers, so the raw JSON value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(JsonValue);

impl DocumentId {
    /// Wrap a raw JSON id.
    #[must_use]
    pub const fn new(raw: JsonValue) -> Self {
        Self(raw)
    }

    /// The raw JSON id.
    #[must_use]
    pub const fn as_json(&self) -> &JsonValue {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(JsonValue::String(value.to_string()))
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(JsonValue::String(value))
    }
}

impl From<i64> for DocumentId {
    fn from(value: i64) -> Self {
        Self(JsonValue::from(value))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            JsonValue::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// A JSON object document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, JsonValue>);

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a JSON value into a document; only objects are accepted.
    pub fn from_json(value: JsonValue) -> Result<Self, WireError> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(WireError::malformed(
                "document",
                format!("expected object, got {other}"),
            )),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// The document's `_id`, if present.
    #[must_use]
    pub fn id(&self) -> Option<DocumentId> {
        self.0.get(ID_FIELD).cloned().map(DocumentId)
    }

    /// Returns true if this document carries the given `_id`.
    #[must_use]
    pub fn has_id(&self, id: &DocumentId) -> bool {
        self.0.get(ID_FIELD).is_some_and(|raw| *raw == id.0)
    }

    /// Value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    /// Set `field`, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Copies every field of `other` over this document's fields.
    pub fn merge_from(&mut self, other: Document) {
        self.0.extend(other.0);
    }

    /// Every field, including `_id`.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    /// The document as a JSON object.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.0)
    }
}

/// Shared, identity-preserving handle to a cached document.
#[derive(Debug, Clone)]
pub struct SharedDocument(Arc<RwLock<Document>>);

impl SharedDocument {
    /// Wrap `doc` in a new shared handle.
    #[must_use]
    pub fn new(doc: Document) -> Self {
        Self(Arc::new(RwLock::new(doc)))
    }

    /// Clone of the current document contents.
    #[must_use]
    pub fn snapshot(&self) -> Document {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Clone of a single field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<JsonValue> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(field)
            .cloned()
    }

    /// Current `_id`, read under the lock.
    #[must_use]
    pub fn id(&self) -> Option<DocumentId> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).id()
    }

    /// True if the current `_id` equals `id`.
    #[must_use]
    pub fn has_id(&self, id: &DocumentId) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).has_id(id)
    }

    /// Merges fields into the shared object in place.
    pub fn merge(&self, fields: Document) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_from(fields);
    }

    /// Overwrites the shared object in place.
    pub fn replace(&self, doc: Document) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = doc;
    }

    /// Returns true if both handles point at the same cached object.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl From<Document> for SharedDocument {
    fn from(doc: Document) -> Self {
        Self::new(doc)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(Document::from_json(json!([1, 2])).is_err());
        assert!(Document::from_json(json!({"_id": 1})).is_ok());
    }

    #[test]
    fn has_id_matches_strings_and_numbers() {
        let doc = Document::from_json(json!({"_id": "a1", "name": "x"})).unwrap();
        assert!(doc.has_id(&DocumentId::from("a1")));
        assert!(!doc.has_id(&DocumentId::from(1)));

        let numeric = Document::new().with(ID_FIELD, 7);
        assert!(numeric.has_id(&DocumentId::from(7)));
    }

    #[test]
    fn merge_overwrites_and_keeps_other_fields() {
        let mut doc = Document::new().with(ID_FIELD, 1).with("x", 1).with("y", "keep");
        doc.merge_from(Document::new().with(ID_FIELD, 1).with("x", 2));
        assert_eq!(doc.get("x"), Some(&json!(2)));
        assert_eq!(doc.get("y"), Some(&json!("keep")));
    }

    #[test]
    fn shared_merge_is_visible_through_clones() {
        let shared = SharedDocument::new(Document::new().with(ID_FIELD, 1).with("x", 1));
        let held = shared.clone();
        shared.merge(Document::new().with("x", 2));
        assert!(SharedDocument::ptr_eq(&shared, &held));
        assert_eq!(held.get("x"), Some(json!(2)));
    }

    #[test]
    fn display_of_string_id_is_unquoted() {
        assert_eq!(DocumentId::from("abc").to_string(), "abc");
        assert_eq!(DocumentId::from(3).to_string(), "3");
    }
}
