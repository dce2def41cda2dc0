//! Query descriptors: the immutable, serializable identity of a query.
//!
//! A descriptor is an ordered list of chained operations. Its canonical
//! serialization is the key used to deduplicate live subscriptions, and the
//! terminal operations it contains decide the query mode.

mod builder;
mod descriptor;

pub use builder::{QueryBuilder, QueryChain};
pub use descriptor::{DescriptorKey, ModeFlags, QueryDescriptor, QueryMode, QueryOp};
