//! Insight and evolution bookkeeping
//!
//! Each completed request leaves an [`InsightRecord`]. Every time the insight
//! count reaches an exact multiple of [`EVOLUTION_THRESHOLD`] the evolution
//! level rises by [`EVOLUTION_INCREMENT`] and learning switches to
//! [`LearningMode::Accelerated`].
//!
//! Only a bounded tail of records is kept; the counters cover every request
//! ever recorded. Ethical reviews get their own bounded log.

use crate::request::RequestId;
use crate::routing::ComplexityTier;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};

pub const EVOLUTION_THRESHOLD: u64 = 100;
pub const EVOLUTION_INCREMENT: f64 = 0.1;

/// Records kept by default in each bounded log
pub const DEFAULT_RETENTION: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    Standard,
    Accelerated,
}

/// One completed request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub request: String,
    pub response: String,
    pub tier: ComplexityTier,
    /// Descriptive markers only: lengths and whether the request asked a question
    pub patterns: Vec<String>,
    pub timestamp_ms: i64,
}

impl InsightRecord {
    pub fn new(request: impl Into<String>, response: impl Into<String>, tier: ComplexityTier) -> Self {
        let request = request.into();
        let response = response.into();
        let patterns = vec![
            format!("request_length:{}", request.chars().count()),
            format!("response_length:{}", response.chars().count()),
            format!("has_question:{}", request.contains('?')),
        ];
        Self {
            request,
            response,
            tier,
            patterns,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Emitted when an insight crosses the evolution threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvolutionEvent {
    pub insight_count: u64,
    pub evolution_level: f64,
}

#[derive(Debug)]
struct TrackerState {
    insights: VecDeque<InsightRecord>,
    count: u64,
    evolutions: u64,
    learning_mode: LearningMode,
}

/// Bounded insight log with monotonic evolution counters
#[derive(Debug)]
pub struct InsightTracker {
    state: Mutex<TrackerState>,
    retention: usize,
}

impl InsightTracker {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Keep at most `retention` records (at least one)
    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                insights: VecDeque::new(),
                count: 0,
                evolutions: 0,
                learning_mode: LearningMode::Standard,
            }),
            retention: retention.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a completed request. Returns the evolution event if this
    /// insight triggered one.
    pub fn record(&self, insight: InsightRecord) -> Option<EvolutionEvent> {
        let mut state = self.lock();
        if state.insights.len() >= self.retention {
            state.insights.pop_front();
        }
        state.insights.push_back(insight);
        state.count += 1;

        if state.count % EVOLUTION_THRESHOLD != 0 {
            return None;
        }

        state.evolutions += 1;
        state.learning_mode = LearningMode::Accelerated;
        let event = EvolutionEvent {
            insight_count: state.count,
            evolution_level: state.evolutions as f64 * EVOLUTION_INCREMENT,
        };
        info!(
            insights = event.insight_count,
            level = event.evolution_level,
            "evolution triggered"
        );
        Some(event)
    }

    pub fn insight_count(&self) -> u64 {
        self.lock().count
    }

    pub fn evolution_level(&self) -> f64 {
        self.lock().evolutions as f64 * EVOLUTION_INCREMENT
    }

    pub fn learning_mode(&self) -> LearningMode {
        self.lock().learning_mode
    }

    /// The last `n` retained insights, oldest first
    pub fn recent(&self, n: usize) -> Vec<InsightRecord> {
        let state = self.lock();
        let start = state.insights.len().saturating_sub(n);
        state.insights.iter().skip(start).cloned().collect()
    }

    /// Records currently held
    pub fn retained(&self) -> usize {
        self.lock().insights.len()
    }
}

impl Default for InsightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A request sent to ethical review instead of its normal route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EthicalReviewRecord {
    pub request_id: RequestId,
    /// Sensitive keywords found in the query
    pub matched_keywords: Vec<String>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct ReviewState {
    records: VecDeque<EthicalReviewRecord>,
    count: u64,
}

/// Bounded log of ethical review decisions with a total count
#[derive(Debug)]
pub struct EthicalReviewLog {
    state: Mutex<ReviewState>,
    retention: usize,
}

impl EthicalReviewLog {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(ReviewState::default()),
            retention: retention.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReviewState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record<I, K>(&self, request_id: RequestId, matched_keywords: I) -> EthicalReviewRecord
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let record = EthicalReviewRecord {
            request_id,
            matched_keywords: matched_keywords.into_iter().map(Into::into).collect(),
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        warn!(
            %request_id,
            keywords = ?record.matched_keywords,
            "request sent to ethical review"
        );

        let mut state = self.lock();
        if state.records.len() >= self.retention {
            state.records.pop_front();
        }
        state.records.push_back(record.clone());
        state.count += 1;
        record
    }

    /// Reviews since startup, including ones no longer retained
    pub fn count(&self) -> u64 {
        self.lock().count
    }

    /// The last `n` retained reviews, oldest first
    pub fn recent(&self, n: usize) -> Vec<EthicalReviewRecord> {
        let state = self.lock();
        let start = state.records.len().saturating_sub(n);
        state.records.iter().skip(start).cloned().collect()
    }
}

impl Default for EthicalReviewLog {
    fn default() -> Self {
        Self::new()
    }
}
