//! Context chaining
//!
//! Every completed exchange is appended to a chain of context. Chains are
//! append-only and copy-on-write: the store swaps whole snapshots, so a
//! reader holding an `Arc<ContextChain>` never observes a partial update.

mod chain;
mod store;

pub use chain::{ChainId, ContextChain, ContextNode, Metadata, NodeId, EPHEMERAL_CHAIN_ID};
pub use store::{
    ContextError, ContextQuery, ContextQueryResult, ContextResult, ContextStats, ContextStore,
    RELEVANCE_KEY,
};
