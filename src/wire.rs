//! Wire contract with the remote peer.
//!
//! Outbound calls are named `<namespace>.<model>.<method>`; pushed events
//! arrive as `<namespace>.<model>.<event>(lqId, ...)` and are decoded here
//! into typed [`PushEvent`]s before they touch any live query.

use serde_json::Value as JsonValue;

use crate::document::{Document, DocumentId};
use crate::error::WireError;
use crate::live::{DistinctDelta, InitialResult, LiveEvent, ResultIndex};
use crate::query::QueryMode;
use crate::registry::LiveQueryId;

/// Remote method names, relative to the model (or namespace for client calls).
#[allow(missing_docs)]
pub mod methods {
    pub const SAVE: &str = "save";
    pub const UPDATE: &str = "update";
    pub const CREATE: &str = "create";
    pub const REMOVE: &str = "remove";
    pub const LIST_PATHS: &str = "listPaths";
    pub const QUERY: &str = "query";
    pub const LIVE_QUERY: &str = "liveQuery";
    pub const UNSUB_LQ: &str = "unsubLQ";
    pub const AUTHORIZE: &str = "authorize";
    pub const GET_MODELS: &str = "getModels";
}

/// Push method names each model exposes.
pub const PUSH_EVENTS: [&str; 4] = ["add", "update", "remove", "distinctSync"];

/// A decoded push call.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub lq_id: LiveQueryId,
    pub event: LiveEvent,
}

impl PushEvent {
    /// Decode the arguments of push method `event_name`.
    pub fn decode(event_name: &str, args: &[JsonValue]) -> Result<Self, WireError> {
        let arity = match event_name {
            "add" | "update" => 3,
            "remove" | "distinctSync" => 2,
            other => {
                return Err(WireError::UnknownMethod {
                    method: other.to_string(),
                })
            }
        };
        // A trailing optional index may be omitted for add.
        let minimum = if event_name == "add" { 2 } else { arity };
        if args.len() < minimum || args.len() > arity {
            return Err(WireError::Arity {
                method: event_name.to_string(),
                expected: arity,
                actual: args.len(),
            });
        }

        let lq_id = decode_lq_id(&args[0])?;
        let event = match event_name {
            "add" => LiveEvent::Add {
                doc: Document::from_json(args[1].clone())?,
                index: args.get(2).and_then(JsonValue::as_u64).and_then(|i| usize::try_from(i).ok()),
            },
            "update" => LiveEvent::Update {
                doc: Document::from_json(args[1].clone())?,
                index: decode_result_index(&args[2])?,
            },
            "remove" => LiveEvent::Remove {
                id: DocumentId::new(args[1].clone()),
            },
            _ => LiveEvent::DistinctSync(
                serde_json::from_value::<DistinctDelta>(args[1].clone())
                    .map_err(|e| WireError::malformed("distinctSync", e))?,
            ),
        };
        Ok(Self { lq_id, event })
    }
}

fn decode_lq_id(value: &JsonValue) -> Result<LiveQueryId, WireError> {
    let raw = match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    match raw {
        Some(id) if id >= 1 => Ok(LiveQueryId::new(id)),
        _ => Err(WireError::InvalidId {
            value: value.to_string(),
        }),
    }
}

fn decode_result_index(value: &JsonValue) -> Result<ResultIndex, WireError> {
    match value {
        JsonValue::Bool(false) => Ok(ResultIndex::Excluded),
        JsonValue::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(i), _) => usize::try_from(i)
                .map(ResultIndex::At)
                .map_err(|e| WireError::malformed("update index", e)),
            (None, Some(i)) if i < 0 => Ok(ResultIndex::Absent),
            _ => Err(WireError::malformed("update index", format!("not an integer: {n}"))),
        },
        other => Err(WireError::malformed("update index", format!("expected false or integer, got {other}"))),
    }
}

/// Split `<namespace>.<model>.<event>` into model and event names.
#[must_use]
pub fn split_push_method<'a>(full: &'a str, namespace: &str) -> Option<(&'a str, &'a str)> {
    let rest = full.strip_prefix(namespace)?.strip_prefix('.')?;
    let (model, event) = rest.rsplit_once('.')?;
    if model.is_empty() || event.is_empty() {
        return None;
    }
    Some((model, event))
}

fn field<'a>(response: &'a JsonValue, name: &str, context: &str) -> Result<&'a JsonValue, WireError> {
    response
        .get(name)
        .ok_or_else(|| WireError::malformed(context, format!("missing '{name}'")))
}

fn decode_docs(value: &JsonValue, context: &str) -> Result<Vec<Document>, WireError> {
    match value {
        JsonValue::Array(items) => items.iter().cloned().map(Document::from_json).collect(),
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Object(_) => Ok(vec![Document::from_json(value.clone())?]),
        other => Err(WireError::malformed(context, format!("expected documents, got {other}"))),
    }
}

fn decode_values(value: &JsonValue, context: &str) -> Result<Vec<JsonValue>, WireError> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| WireError::malformed(context, "expected an array of values"))
}

/// Decode the initial `liveQuery` response for `mode`.
///
/// `{count}` for count queries, `{values}` for distinct, `{docs}` otherwise.
/// A findOne response may carry `{doc}` instead.
pub fn decode_initial(mode: QueryMode, response: JsonValue) -> Result<InitialResult, WireError> {
    const CONTEXT: &str = "liveQuery response";
    match mode {
        QueryMode::Count => {
            let count = field(&response, "count", CONTEXT)?;
            count
                .as_i64()
                .map(InitialResult::Count)
                .ok_or_else(|| WireError::malformed(CONTEXT, format!("count is not an integer: {count}")))
        }
        QueryMode::Distinct => decode_values(field(&response, "values", CONTEXT)?, CONTEXT).map(InitialResult::Values),
        QueryMode::FindOne if response.get("docs").is_none() => {
            decode_docs(field(&response, "doc", CONTEXT)?, CONTEXT).map(InitialResult::Docs)
        }
        QueryMode::FindOne | QueryMode::Normal { .. } => {
            decode_docs(field(&response, "docs", CONTEXT)?, CONTEXT).map(InitialResult::Docs)
        }
    }
}

/// Result of a one-shot query, shaped by its mode.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Doc(Option<Document>),
    Values(Vec<JsonValue>),
    Count(u64),
    Docs(Vec<Document>),
}

/// Shape a one-shot `query` response.
pub fn decode_query_result(mode: QueryMode, response: JsonValue) -> Result<QueryResult, WireError> {
    const CONTEXT: &str = "query response";
    match mode {
        QueryMode::FindOne => match response {
            JsonValue::Null => Ok(QueryResult::Doc(None)),
            other => Document::from_json(other).map(|d| QueryResult::Doc(Some(d))),
        },
        QueryMode::Distinct => decode_values(&response, CONTEXT).map(QueryResult::Values),
        QueryMode::Count => response
            .as_u64()
            .map(QueryResult::Count)
            .ok_or_else(|| WireError::malformed(CONTEXT, format!("count is not a non-negative integer: {response}"))),
        QueryMode::Normal { .. } => decode_docs(&response, CONTEXT).map(QueryResult::Docs),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_add_with_and_without_index() {
        let ev = PushEvent::decode("add", &[json!(3), json!({"_id": "a"}), json!(2)]).unwrap();
        assert_eq!(ev.lq_id, LiveQueryId::new(3));
        assert!(matches!(ev.event, LiveEvent::Add { index: Some(2), .. }));

        let ev = PushEvent::decode("add", &[json!("3"), json!({"_id": "a"}), json!(true)]).unwrap();
        assert!(matches!(ev.event, LiveEvent::Add { index: None, .. }));

        let ev = PushEvent::decode("add", &[json!(1), json!({"_id": "a"})]).unwrap();
        assert!(matches!(ev.event, LiveEvent::Add { index: None, .. }));
    }

    #[test]
    fn decodes_update_indices() {
        let idx = |v: JsonValue| match PushEvent::decode("update", &[json!(1), json!({"_id": 1}), v]).unwrap().event {
            LiveEvent::Update { index, .. } => index,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(idx(json!(false)), ResultIndex::Excluded);
        assert_eq!(idx(json!(-1)), ResultIndex::Absent);
        assert_eq!(idx(json!(4)), ResultIndex::At(4));
        assert!(PushEvent::decode("update", &[json!(1), json!({"_id": 1}), json!(true)]).is_err());
    }

    #[test]
    fn decodes_remove_and_distinct_sync() {
        let ev = PushEvent::decode("remove", &[json!(2), json!("abc")]).unwrap();
        assert_eq!(ev.event, LiveEvent::Remove { id: DocumentId::from("abc") });

        let ev = PushEvent::decode("distinctSync", &[json!(2), json!({"add": ["x"], "remove": []})]).unwrap();
        assert_eq!(
            ev.event,
            LiveEvent::DistinctSync(DistinctDelta {
                add: vec![json!("x")],
                remove: vec![]
            })
        );
    }

    #[test]
    fn rejects_bad_ids_and_arity() {
        assert!(matches!(
            PushEvent::decode("remove", &[json!(0), json!("a")]),
            Err(WireError::InvalidId { .. })
        ));
        assert!(matches!(
            PushEvent::decode("remove", &[json!(1)]),
            Err(WireError::Arity { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            PushEvent::decode("rename", &[json!(1)]),
            Err(WireError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn splits_push_method_names() {
        assert_eq!(split_push_method("MR.fighter.add", "MR"), Some(("fighter", "add")));
        assert_eq!(split_push_method("MR.a.b.distinctSync", "MR"), Some(("a.b", "distinctSync")));
        assert_eq!(split_push_method("XX.fighter.add", "MR"), None);
        assert_eq!(split_push_method("MR.add", "MR"), None);
    }

    #[test]
    fn decodes_initial_responses_by_mode() {
        assert_eq!(
            decode_initial(QueryMode::Count, json!({"count": 4})).unwrap(),
            InitialResult::Count(4)
        );
        assert_eq!(
            decode_initial(QueryMode::Distinct, json!({"values": [1, 2]})).unwrap(),
            InitialResult::Values(vec![json!(1), json!(2)])
        );
        let docs = decode_initial(QueryMode::Normal { limit: None }, json!({"docs": [{"_id": 1}]})).unwrap();
        assert!(matches!(docs, InitialResult::Docs(ref d) if d.len() == 1));
        let one = decode_initial(QueryMode::FindOne, json!({"doc": {"_id": 1}})).unwrap();
        assert!(matches!(one, InitialResult::Docs(ref d) if d.len() == 1));
        assert!(decode_initial(QueryMode::Count, json!({"docs": []})).is_err());
    }

    #[test]
    fn shapes_one_shot_results() {
        assert_eq!(
            decode_query_result(QueryMode::Count, json!(7)).unwrap(),
            QueryResult::Count(7)
        );
        assert_eq!(
            decode_query_result(QueryMode::FindOne, JsonValue::Null).unwrap(),
            QueryResult::Doc(None)
        );
        assert!(matches!(
            decode_query_result(QueryMode::Normal { limit: Some(2) }, json!([{"_id": 1}])).unwrap(),
            QueryResult::Docs(ref d) if d.len() == 1
        ));
    }
}
