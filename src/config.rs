//! Engine configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the orchestrator and its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    /// Upper bound on responder calls in flight at once
    pub max_concurrent_calls: usize,
    /// Optional per-call timeout enforced by the invoker (off by default;
    /// responders own their own timeouts)
    pub responder_timeout_ms: Option<u64>,
    /// How many of the most recently updated chains a query considers
    pub query_chain_limit: usize,
    /// Trailing window used to count active chains
    pub active_window_secs: u64,
    /// Retention limit for chains; `None` keeps every chain
    pub max_retained_chains: Option<usize>,
    /// Relevance score assigned to newly created chains
    pub initial_relevance: f32,
    /// Spawn a detached synthesis call after a successful fusion
    pub follow_up_synthesis: bool,
    /// Successful transcendent cycles required before the evolutionary marker may be set
    pub evolutionary_after_cycles: u64,
    /// Insight records kept in memory; the insight count is not affected
    pub insight_retention: usize,
    /// Ethical review records kept in memory
    pub ethical_review_retention: usize,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            responder_timeout_ms: None,
            query_chain_limit: 10,
            active_window_secs: 3600,
            max_retained_chains: None,
            initial_relevance: 1.0,
            follow_up_synthesis: true,
            evolutionary_after_cycles: 3,
            insight_retention: 1000,
            ethical_review_retention: 1000,
        }
    }
}

impl ConfluenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yaml rejects an empty document, which should mean "all defaults"
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if self.query_chain_limit == 0 {
            return Err(ConfigError::Invalid(
                "query_chain_limit must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_relevance) {
            return Err(ConfigError::Invalid(format!(
                "initial_relevance must be within [0, 1], got {}",
                self.initial_relevance
            )));
        }
        if self.insight_retention == 0 || self.ethical_review_retention == 0 {
            return Err(ConfigError::Invalid(
                "insight_retention and ethical_review_retention must be at least 1".to_string(),
            ));
        }
        if self.max_retained_chains == Some(0) {
            return Err(ConfigError::Invalid(
                "max_retained_chains must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = limit;
        self
    }

    pub fn with_active_window(mut self, window: Duration) -> Self {
        self.active_window_secs = window.as_secs();
        self
    }

    pub fn with_retention(mut self, max_chains: usize) -> Self {
        self.max_retained_chains = Some(max_chains);
        self
    }

    pub fn with_insight_retention(mut self, records: usize) -> Self {
        self.insight_retention = records;
        self
    }

    pub fn with_follow_up_synthesis(mut self, enabled: bool) -> Self {
        self.follow_up_synthesis = enabled;
        self
    }

    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn responder_timeout(&self) -> Option<Duration> {
        self.responder_timeout_ms.map(Duration::from_millis)
    }
}
