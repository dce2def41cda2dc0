use crate::error::MirrorResult;
use crate::live::LiveQuery;
use crate::query::{QueryBuilder, QueryChain, QueryOp};
use crate::wire::{self, methods, QueryResult};

use super::Model;

/// One-shot query chain bound to a model.
///
/// # Example
/// ```rust,ignore
/// let fighters = model
///     .query()
///     .find(json!({"health": {"$gt": 10}}))
///     .sort("name")
///     .exec()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct ChainableQuery {
    model: Model,
    builder: QueryBuilder,
}

impl ChainableQuery {
    pub(crate) fn new(model: Model, builder: QueryBuilder) -> Self {
        Self { model, builder }
    }

    /// Send the query and shape the result by mode. Nothing is cached.
    pub async fn exec(self) -> MirrorResult<QueryResult> {
        let descriptor = self.builder.build()?;
        let mode = descriptor.mode()?;
        let response = self
            .model
            .call(methods::QUERY, vec![descriptor.to_json()])
            .await?;
        tracing::debug!(model = %self.model.name(), ?mode, "query result received");
        Ok(wire::decode_query_result(mode, response)?)
    }
}

impl QueryChain for ChainableQuery {
    fn push_op(mut self, op: QueryOp) -> Self {
        self.builder = self.builder.push_op(op);
        self
    }
}

/// Live query chain bound to a model.
#[derive(Debug, Clone)]
pub struct ChainableLiveQuery {
    model: Model,
    builder: QueryBuilder,
}

impl ChainableLiveQuery {
    pub(crate) fn new(model: Model, builder: QueryBuilder) -> Self {
        Self { model, builder }
    }

    /// Finalize into an unexecuted handle.
    ///
    /// Listeners can be attached before [`LiveQuery::execute`] so they see `init`.
    pub fn build(self) -> MirrorResult<LiveQuery> {
        let descriptor = self.builder.build()?;
        Ok(self.model.live_query_for(descriptor))
    }

    /// Finalize and execute. May return an existing live query with the same descriptor.
    pub async fn exec(self) -> MirrorResult<LiveQuery> {
        self.build()?.execute().await
    }
}

impl QueryChain for ChainableLiveQuery {
    fn push_op(mut self, op: QueryOp) -> Self {
        self.builder = self.builder.push_op(op);
        self
    }
}
