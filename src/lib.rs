//! # livemirror - live query mirrors of a remote document collection
//!
//! livemirror keeps the result set of a remote query up to date on the client.
//! After an initial response, the server pushes incremental `add`, `update`,
//! `remove` and `distinctSync` events and the client applies them to its cache
//! without re-fetching.
//!
//! ## Core Concepts
//!
//! - **Model**: one remote collection; owns its live queries
//! - **QueryDescriptor**: the serializable operation chain identifying a query
//! - **LiveQuery**: a subscription whose cache is documents, a count, or a set
//!   of distinct values depending on the query mode
//! - **Transport**: the RPC channel, supplied by the embedding application
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livemirror::{Client, EventKind, QueryChain};
//! use serde_json::json;
//!
//! let client = Client::new(transport);
//! let fighters = client.model("fighter")?;
//!
//! let lq = fighters
//!     .live_query()
//!     .find(json!({"health": {"$gt": 0}}))
//!     .sort("name")
//!     .build()?;
//! lq.on(EventKind::Any, |n| {
//!     println!("{n:?}");
//!     Ok(())
//! });
//! let lq = lq.execute().await?;
//!
//! // transport glue:
//! client.dispatch_push("MR.fighter.add", &[json!(1), json!({"_id": "a"}), json!(0)])?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod document;
pub mod error;
pub mod query;

// Synchronization
pub mod live;
pub mod reconnect;
pub mod registry;

// Remote surface
pub mod client;
pub mod model;
pub mod transport;
pub mod wire;

pub use client::Client;
pub use config::ClientConfig;
pub use document::{Document, DocumentId, SharedDocument};
pub use error::{MirrorError, MirrorResult, TransportError, ValidationError, WireError};
pub use live::{
    Applied, Delivery, EventKind, ListenerHandle, LiveEvent, LiveQuery, LiveQueryStream, Notification,
    ResultIndex,
};
pub use model::{ChainableLiveQuery, ChainableQuery, Model};
pub use query::{QueryBuilder, QueryChain, QueryDescriptor, QueryMode};
pub use reconnect::{ConnectionSignal, ReconnectPolicy};
pub use registry::LiveQueryId;
pub use transport::{MemoryTransport, Transport};
pub use wire::{PushEvent, QueryResult};
