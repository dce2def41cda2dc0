//! Fluent query building.
//!
//! [`QueryChain`] supplies the chainable operation methods; it is implemented
//! by the plain [`QueryBuilder`] and by the model-bound chainables in
//! [`crate::model`]. Nothing is validated until the chain is finalized.

use serde_json::Value as JsonValue;

use crate::error::ValidationError;

use super::descriptor::{QueryDescriptor, QueryOp};

/// Chainable query operations, named after their wire methods.
pub trait QueryChain: Sized {
    /// Append one raw operation.
    #[must_use]
    fn push_op(self, op: QueryOp) -> Self;

    /// Append an operation by method name.
    #[must_use]
    fn op(self, method: impl Into<String>, args: Vec<JsonValue>) -> Self {
        self.push_op(QueryOp::new(method, args))
    }

    #[must_use]
    fn find(self, filter: JsonValue) -> Self {
        self.op("find", vec![filter])
    }

    /// Marks the query as findOne (single document).
    #[must_use]
    fn find_one(self, filter: JsonValue) -> Self {
        self.op("findOne", vec![filter])
    }

    #[must_use]
    fn where_(self, path: impl Into<String>) -> Self {
        self.op("where", vec![JsonValue::String(path.into())])
    }

    #[must_use]
    fn equals(self, value: impl Into<JsonValue>) -> Self {
        self.op("equals", vec![value.into()])
    }

    #[must_use]
    fn gt(self, value: impl Into<JsonValue>) -> Self {
        self.op("gt", vec![value.into()])
    }

    #[must_use]
    fn lt(self, value: impl Into<JsonValue>) -> Self {
        self.op("lt", vec![value.into()])
    }

    #[must_use]
    fn select(self, fields: impl Into<String>) -> Self {
        self.op("select", vec![JsonValue::String(fields.into())])
    }

    #[must_use]
    fn populate(self, path: impl Into<String>) -> Self {
        self.op("populate", vec![JsonValue::String(path.into())])
    }

    /// Sort specification, e.g. `"-age name"`. Not allowed together with `count`.
    #[must_use]
    fn sort(self, spec: impl Into<String>) -> Self {
        self.op("sort", vec![JsonValue::String(spec.into())])
    }

    #[must_use]
    fn skip(self, n: u64) -> Self {
        self.op("skip", vec![JsonValue::from(n)])
    }

    /// Caps a normal query's result set.
    #[must_use]
    fn limit(self, n: u64) -> Self {
        self.op("limit", vec![JsonValue::from(n)])
    }

    /// Marks the query as distinct over `field`.
    #[must_use]
    fn distinct(self, field: impl Into<String>) -> Self {
        self.op("distinct", vec![JsonValue::String(field.into())])
    }

    /// Marks the query as count-only.
    #[must_use]
    fn count(self) -> Self {
        self.op("count", Vec::new())
    }
}

/// Builder producing a finalized [`QueryDescriptor`].
///
/// # Example
/// ```rust
/// use livemirror::query::{QueryBuilder, QueryChain};
/// use serde_json::json;
///
/// let descriptor = QueryBuilder::new()
///     .find(json!({"health": {"$gt": 10}}))
///     .sort("name")
///     .limit(5)
///     .build()
///     .unwrap();
/// assert_eq!(descriptor.mode().unwrap().limit(), Some(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    ops: Vec<QueryOp>,
}

impl QueryBuilder {
    /// Empty operation chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing descriptor's operations (used when rebuilding a live query).
    #[must_use]
    pub fn from_descriptor(descriptor: &QueryDescriptor) -> Self {
        Self {
            ops: descriptor.ops().to_vec(),
        }
    }

    /// Operations chained so far.
    #[must_use]
    pub fn ops(&self) -> &[QueryOp] {
        &self.ops
    }

    /// Finalize the chain.
    ///
    /// Returns `ValidationError::CountWithSort` if `count` and `sort` were combined.
    pub fn build(self) -> Result<QueryDescriptor, ValidationError> {
        QueryDescriptor::new(self.ops)
    }
}

impl QueryChain for QueryBuilder {
    fn push_op(mut self, op: QueryOp) -> Self {
        self.ops.push(op);
        self
    }
}
