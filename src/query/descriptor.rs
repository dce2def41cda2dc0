//! Finalized query descriptors and mode resolution.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::ValidationError;

/// One chained query operation, e.g. `sort("-age")` or `limit(5)`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOp {
    pub method: String,
    #[serde(default)]
    pub args: Vec<JsonValue>,
}

impl QueryOp {
    /// Operation `method` called with `args`.
    #[must_use]
    pub fn new(method: impl Into<String>, args: Vec<JsonValue>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    fn to_json(&self) -> JsonValue {
        json!({ "method": self.method, "args": self.args })
    }
}

/// Canonical serialization of a descriptor; the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorKey(String);

impl DescriptorKey {
    /// Canonical JSON form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mode flags derived from which terminal operations a descriptor contains.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub find_one: bool,
    pub distinct: bool,
    pub count: bool,
    pub sort: bool,
    /// Raw `limit` argument, if any. Validated by [`ModeFlags::resolve`].
    pub limit: Option<i64>,
}

impl ModeFlags {
    /// Derive flags from an operation list. Later `limit` ops override earlier ones.
    #[must_use]
    pub fn from_ops(ops: &[QueryOp]) -> Self {
        let mut flags = Self::default();
        for op in ops {
            match op.method.as_str() {
                "findOne" => flags.find_one = true,
                "distinct" => flags.distinct = true,
                "count" => flags.count = true,
                "sort" => flags.sort = true,
                "limit" => {
                    flags.limit = Some(op.args.first().and_then(JsonValue::as_i64).unwrap_or(0));
                }
                _ => {}
            }
        }
        flags
    }

    /// Validate the flag combination and resolve the effective mode.
    ///
    /// Precedence: findOne, distinct, count, normal. `limit` only applies to
    /// normal mode.
    pub fn resolve(&self) -> Result<QueryMode, ValidationError> {
        if self.count && self.sort {
            return Err(ValidationError::CountWithSort);
        }
        let limit = match self.limit {
            None => None,
            Some(v) if v > 0 => usize::try_from(v).ok(),
            Some(v) => return Err(ValidationError::InvalidLimit { value: v }),
        };

        Ok(if self.find_one {
            QueryMode::FindOne
        } else if self.distinct {
            QueryMode::Distinct
        } else if self.count {
            QueryMode::Count
        } else {
            QueryMode::Normal { limit }
        })
    }
}

/// Resolved query mode; decides which cache is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Ordered document list, optionally capped.
    Normal { limit: Option<usize> },
    /// At most one document.
    FindOne,
    /// Cardinality only.
    Count,
    /// Set of distinct scalar values.
    Distinct,
}

impl QueryMode {
    /// True for count-mode queries.
    #[must_use]
    pub const fn is_count(&self) -> bool {
        matches!(self, Self::Count)
    }

    /// True for distinct-mode queries.
    #[must_use]
    pub const fn is_distinct(&self) -> bool {
        matches!(self, Self::Distinct)
    }

    /// Cap of a normal-mode query.
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        match self {
            Self::Normal { limit } => *limit,
            _ => None,
        }
    }
}

/// Immutable, serializable identity of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryDescriptor {
    ops: Vec<QueryOp>,
}

impl QueryDescriptor {
    /// Finalize an operation list, rejecting invalid mode combinations.
    pub fn new(ops: Vec<QueryOp>) -> Result<Self, ValidationError> {
        if ops.iter().any(|op| op.method.trim().is_empty()) {
            return Err(ValidationError::EmptyMethod);
        }
        let descriptor = Self { ops };
        descriptor.mode()?;
        Ok(descriptor)
    }

    /// Operations in call order.
    #[must_use]
    pub fn ops(&self) -> &[QueryOp] {
        &self.ops
    }

    /// Mode flags of this descriptor.
    #[must_use]
    pub fn flags(&self) -> ModeFlags {
        ModeFlags::from_ops(&self.ops)
    }

    /// Resolve the mode. Descriptors that bypassed [`QueryDescriptor::new`]
    /// (e.g. deserialized ones) are checked here before any network call.
    pub fn mode(&self) -> Result<QueryMode, ValidationError> {
        self.flags().resolve()
    }

    /// Wire form sent as the first argument of `query` / `liveQuery`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.ops.iter().map(QueryOp::to_json).collect())
    }

    /// Canonical serialization used as the dedup key.
    #[must_use]
    pub fn key(&self) -> DescriptorKey {
        DescriptorKey(self.to_json().to_string())
    }
}
