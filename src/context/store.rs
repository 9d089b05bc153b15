//! ContextStore: owns every context chain and the statistics derived from them

use super::chain::{ChainId, ChainIdGenerator, ContextChain, Metadata};
use crate::config::ConfluenceConfig;
use crate::responder::ResponderId;
use crate::synthesis::clamp_confidence;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Node metadata key that, when it parses as a float, sets the chain's relevance
pub const RELEVANCE_KEY: &str = "relevance";

/// Errors that can occur in context store operations
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Chain not found: {0}")]
    ChainNotFound(ChainId),
}

/// Result type for context store operations
pub type ContextResult<T> = Result<T, ContextError>;

/// Statistics recomputed after every mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub total_chains: usize,
    /// Chains updated within the configured trailing window
    pub active_chains: usize,
    pub longest_chain_length: usize,
    pub last_computed_ms: i64,
}

/// Filter for [`ContextStore::query_chains`]
#[derive(Debug, Clone, PartialEq)]
pub struct ContextQuery {
    /// Seeds the throwaway chain when nothing matches
    pub query: String,
    /// Keep only chains any of these responders contributed to (empty = all)
    pub responders: Vec<ResponderId>,
    pub min_relevance: f32,
    pub max_results: usize,
}

impl ContextQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            responders: Vec::new(),
            min_relevance: 0.0,
            max_results: 5,
        }
    }

    pub fn with_responder(mut self, responder: ResponderId) -> Self {
        self.responders.push(responder);
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f32) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// The best matching chain plus the other survivors, most recent first
#[derive(Debug, Clone)]
pub struct ContextQueryResult {
    pub chain: Arc<ContextChain>,
    pub related: Vec<Arc<ContextChain>>,
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Store of context chains.
///
/// Chains are held as `Arc` snapshots. An update replaces the whole snapshot
/// while holding the chain's map entry, so two appends to the same chain
/// never interleave and readers never see a half-built chain. Different
/// chains update independently.
pub struct ContextStore {
    chains: DashMap<ChainId, Arc<ContextChain>>,
    ids: ChainIdGenerator,
    stats: RwLock<ContextStats>,
    /// Serializes chain creation and eviction
    structure: Mutex<()>,
    active_window: Duration,
    query_chain_limit: usize,
    max_retained: Option<usize>,
    initial_relevance: f32,
    clock: Clock,
}

impl ContextStore {
    pub fn new(config: &ConfluenceConfig) -> Self {
        Self {
            chains: DashMap::new(),
            ids: ChainIdGenerator::default(),
            stats: RwLock::new(ContextStats::default()),
            structure: Mutex::new(()),
            active_window: config.active_window(),
            query_chain_limit: config.query_chain_limit.max(1),
            max_retained: config.max_retained_chains,
            initial_relevance: clamp_confidence(config.initial_relevance),
            clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Replace the wall clock (milliseconds since the epoch)
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Create a chain with a single node and return its id
    pub fn create_chain(
        &self,
        root: impl Into<String>,
        initial_content: impl Into<String>,
        responder: ResponderId,
        metadata: Metadata,
    ) -> ChainId {
        let now = self.now();
        let id = {
            let _guard = self
                .structure
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let id = self.ids.next(now);
            let chain = ContextChain::new(
                id.clone(),
                root,
                initial_content,
                responder,
                metadata,
                self.initial_relevance,
                now,
            );
            self.chains.insert(id.clone(), Arc::new(chain));
            self.enforce_retention(&id);
            id
        };
        debug!(chain_id = %id, %responder, "created context chain");
        self.recompute_stats();
        id
    }

    /// Append a node to an existing chain and return the new snapshot.
    ///
    /// Unknown ids fail with [`ContextError::ChainNotFound`] and change nothing.
    pub fn append_to_chain(
        &self,
        id: &ChainId,
        content: impl Into<String>,
        responder: ResponderId,
        metadata: Metadata,
    ) -> ContextResult<Arc<ContextChain>> {
        let now = self.now();
        let relevance = metadata
            .get(RELEVANCE_KEY)
            .and_then(|raw| raw.trim().parse::<f32>().ok())
            .map(clamp_confidence);

        let snapshot = {
            let mut entry = self
                .chains
                .get_mut(id)
                .ok_or_else(|| ContextError::ChainNotFound(id.clone()))?;
            let mut next = entry.appended(content, responder, metadata, now);
            if let Some(score) = relevance {
                next.relevance_score = score;
            }
            let next = Arc::new(next);
            *entry = next.clone();
            next
        };

        debug!(chain_id = %id, %responder, length = snapshot.len(), "appended to context chain");
        self.recompute_stats();
        Ok(snapshot)
    }

    /// Overwrite a chain's relevance score (clamped to [0, 1])
    pub fn set_relevance(&self, id: &ChainId, score: f32) -> ContextResult<Arc<ContextChain>> {
        let snapshot = {
            let mut entry = self
                .chains
                .get_mut(id)
                .ok_or_else(|| ContextError::ChainNotFound(id.clone()))?;
            let mut next = ContextChain::clone(&entry);
            next.relevance_score = clamp_confidence(score);
            let next = Arc::new(next);
            *entry = next.clone();
            next
        };

        debug!(chain_id = %id, relevance = snapshot.relevance_score, "set chain relevance");
        self.recompute_stats();
        Ok(snapshot)
    }

    /// Find chains for a query.
    ///
    /// Responder filter, then most recently updated first, truncated to the
    /// configured chain limit, then the relevance floor, then `max_results`.
    /// When nothing survives, the primary chain is a throwaway seeded with
    /// the query text; it is not stored.
    pub fn query_chains(&self, query: &ContextQuery) -> ContextQueryResult {
        let mut candidates: Vec<Arc<ContextChain>> = self
            .chains
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|chain| {
                query.responders.is_empty()
                    || query.responders.iter().any(|r| chain.involves(*r))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.last_updated_ms
                .cmp(&a.last_updated_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        candidates.truncate(self.query_chain_limit);

        let mut survivors: Vec<Arc<ContextChain>> = candidates
            .into_iter()
            .filter(|chain| chain.relevance_score >= query.min_relevance)
            .take(query.max_results)
            .collect();

        if survivors.is_empty() {
            return ContextQueryResult {
                chain: Arc::new(ContextChain::ephemeral(&query.query, self.now())),
                related: Vec::new(),
            };
        }

        let chain = survivors.remove(0);
        ContextQueryResult {
            chain,
            related: survivors,
        }
    }

    /// Recompute and cache the store statistics.
    ///
    /// The scan runs under the write guard so concurrent recomputes publish
    /// in the order they observed the store.
    pub fn recompute_stats(&self) -> ContextStats {
        let mut published = self
            .stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = self.now();
        let window_ms = i64::try_from(self.active_window.as_millis()).unwrap_or(i64::MAX);

        let mut stats = ContextStats {
            last_computed_ms: now,
            ..ContextStats::default()
        };
        for entry in self.chains.iter() {
            let chain = entry.value();
            stats.total_chains += 1;
            if now.saturating_sub(chain.last_updated_ms) <= window_ms {
                stats.active_chains += 1;
            }
            stats.longest_chain_length = stats.longest_chain_length.max(chain.len());
        }

        *published = stats;
        stats
    }

    /// Statistics as of the last mutation
    pub fn stats(&self) -> ContextStats {
        *self
            .stats
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_chain(&self, id: &ChainId) -> Option<Arc<ContextChain>> {
        self.chains.get(id).map(|entry| entry.value().clone())
    }

    pub fn has_chain(&self, id: &ChainId) -> bool {
        self.chains.contains_key(id)
    }

    pub fn list_chains(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.chains.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Evict least recently updated chains beyond the retention limit.
    /// Caller holds the structure lock.
    fn enforce_retention(&self, keep: &ChainId) {
        let Some(limit) = self.max_retained else {
            return;
        };
        let excess = self.chains.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(i64, ChainId)> = self
            .chains
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| (entry.value().last_updated_ms, entry.key().clone()))
            .collect();
        by_age.sort();

        for (_, id) in by_age.into_iter().take(excess) {
            self.chains.remove(&id);
            debug!(chain_id = %id, "evicted context chain");
        }
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("chains", &self.chains.len())
            .field("stats", &self.stats())
            .field("active_window", &self.active_window)
            .field("query_chain_limit", &self.query_chain_limit)
            .field("max_retained", &self.max_retained)
            .finish()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(&ConfluenceConfig::default())
    }
}
