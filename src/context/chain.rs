//! Context chain: an append-only record of exchanges tied to a root topic

use crate::responder::ResponderId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Metadata keys are free-form strings
pub type Metadata = BTreeMap<String, String>;

/// Unique identifier for a chain.
///
/// Generated ids have the form `chain-<ms>-<seq>`, zero-padded so that
/// string order matches creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Produces unique, non-decreasing chain ids.
///
/// Timestamp alone collides within a millisecond, so every id also carries a
/// process-wide sequence number. The timestamp never goes backwards even if
/// the wall clock does.
#[derive(Debug, Default)]
pub(crate) struct ChainIdGenerator {
    state: Mutex<(i64, u64)>,
}

impl ChainIdGenerator {
    pub(crate) fn next(&self, now_ms: i64) -> ChainId {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (last_ms, seq) = &mut *state;
        *last_ms = (*last_ms).max(now_ms);
        *seq += 1;
        ChainId(format!("chain-{:013}-{:010}", *last_ms, *seq))
    }
}

/// Id of the throwaway chain returned when a query finds nothing. The store's
/// generator never produces it.
pub const EPHEMERAL_CHAIN_ID: &str = "chain-ephemeral";

/// Identifier for a node, ordered within its chain
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    fn for_position(chain: &ChainId, index: usize) -> Self {
        Self(format!("{}#{:06}", chain, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One exchange in a chain. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    pub id: NodeId,
    pub content: String,
    pub responder: ResponderId,
    pub metadata: Metadata,
    pub created_at_ms: i64,
}

/// An append-only chain of context.
///
/// The store only ever hands out snapshots; an update builds a new chain
/// with [`appended`](Self::appended) and swaps it in whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChain {
    pub id: ChainId,
    pub root_context: String,
    pub current_context: String,
    /// Insertion order is causal order
    pub history: Vec<ContextNode>,
    pub per_responder_latest: BTreeMap<ResponderId, String>,
    pub metadata: Metadata,
    pub last_updated_ms: i64,
    pub relevance_score: f32,
}

impl ContextChain {
    pub(crate) fn new(
        id: ChainId,
        root: impl Into<String>,
        initial_content: impl Into<String>,
        responder: ResponderId,
        metadata: Metadata,
        relevance_score: f32,
        now_ms: i64,
    ) -> Self {
        let content = initial_content.into();
        let node = ContextNode {
            id: NodeId::for_position(&id, 0),
            content: content.clone(),
            responder,
            metadata: metadata.clone(),
            created_at_ms: now_ms,
        };
        Self {
            id,
            root_context: root.into(),
            current_context: content.clone(),
            history: vec![node],
            per_responder_latest: BTreeMap::from([(responder, content)]),
            metadata,
            last_updated_ms: now_ms,
            relevance_score,
        }
    }

    /// A chain that exists only for the caller, seeded with `query` as both
    /// root and current context.
    pub fn ephemeral(query: &str, now_ms: i64) -> Self {
        Self::new(
            ChainId::from_string(EPHEMERAL_CHAIN_ID),
            query,
            query,
            ResponderId::Unifying,
            Metadata::from([("ephemeral".to_string(), "true".to_string())]),
            0.0,
            now_ms,
        )
    }

    /// A copy of this chain with one more node.
    ///
    /// Chain-level metadata absorbs the node metadata (later keys win).
    pub(crate) fn appended(
        &self,
        content: impl Into<String>,
        responder: ResponderId,
        metadata: Metadata,
        now_ms: i64,
    ) -> Self {
        let content = content.into();
        let mut next = self.clone();
        next.history.push(ContextNode {
            id: NodeId::for_position(&self.id, self.history.len()),
            content: content.clone(),
            responder,
            metadata: metadata.clone(),
            created_at_ms: now_ms,
        });
        next.current_context = content.clone();
        next.per_responder_latest.insert(responder, content);
        next.metadata.extend(metadata);
        // Timestamps never go backwards within a chain
        next.last_updated_ms = self.last_updated_ms.max(now_ms);
        next
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Decided by the id alone; metadata is caller-writable
    pub fn is_ephemeral(&self) -> bool {
        self.id.as_str() == EPHEMERAL_CHAIN_ID
    }

    /// Whether any node in the chain came from `responder`
    pub fn involves(&self, responder: ResponderId) -> bool {
        self.per_responder_latest.contains_key(&responder)
    }

    /// Latest content contributed by `responder`
    pub fn latest_from(&self, responder: ResponderId) -> Option<&str> {
        self.per_responder_latest.get(&responder).map(String::as_str)
    }

    pub fn last_node(&self) -> Option<&ContextNode> {
        self.history.last()
    }
}
