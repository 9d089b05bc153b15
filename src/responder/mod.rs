//! Responder contract: the external units that turn a request into an answer
//!
//! The engine never knows how a responder produces text (LLM, remote
//! service, template). It depends only on the [`Responder`] trait:
//! - `invoke`: request + context string → content and confidence
//! - `invoke_fusion`: the unifying responder's fusion entry point
//!
//! Implementations:
//! - [`mock::MockResponder`]: scripted responses (tests, CLI demo)

mod invoker;
pub mod mock;

pub use invoker::ResponderInvoker;

use crate::request::Request;
use crate::routing::FusionSubtype;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identity of a responder.
///
/// Variant order is the synthesizer's display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderId {
    Unifying,
    Protective,
    Creative,
}

impl ResponderId {
    pub const ALL: [ResponderId; 3] = [Self::Unifying, Self::Protective, Self::Creative];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unifying => "unifying",
            Self::Protective => "protective",
            Self::Creative => "creative",
        }
    }

    /// Human-readable label used in synthesized output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unifying => "Unifying",
            Self::Protective => "Protective",
            Self::Creative => "Creative",
        }
    }
}

impl std::fmt::Display for ResponderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResponderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown responder: {s}"))
    }
}

/// What a responder returns from an ordinary call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub content: String,
    pub confidence: f32,
}

impl ResponsePayload {
    pub fn new(content: impl Into<String>, confidence: f32) -> Self {
        Self {
            content: content.into(),
            confidence,
        }
    }
}

/// Result of the unifying responder's fusion entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub success: bool,
    #[serde(default)]
    pub result_map: BTreeMap<String, String>,
}

impl FusionOutcome {
    pub fn succeeded<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            success: true,
            result_map: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn declined() -> Self {
        Self {
            success: false,
            result_map: BTreeMap::new(),
        }
    }

    /// The fused text: the `content` entry if present, otherwise every
    /// entry rendered as `key: value` lines.
    pub fn content(&self) -> String {
        match self.result_map.get("content") {
            Some(content) => content.clone(),
            None => self
                .result_map
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// The `confidence` entry if parseable, otherwise full confidence for a
    /// successful outcome and none for a declined one.
    pub fn confidence(&self) -> f32 {
        self.result_map
            .get("confidence")
            .and_then(|c| c.trim().parse::<f32>().ok())
            .unwrap_or(if self.success { 1.0 } else { 0.0 })
    }
}

/// Errors from responder calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResponderError {
    #[error("responder unavailable: {0}")]
    Unavailable(String),
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    #[error("operation not supported by {0} responder")]
    Unsupported(ResponderId),
    #[error("responder timed out after {0} ms")]
    Timeout(u64),
}

/// Contract every responder implements.
///
/// Calls may be slow and may fail; the engine bounds concurrency and
/// converts failures according to the routing path.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Which responder this is
    fn id(&self) -> ResponderId;

    /// Answer a request given the current context text
    async fn invoke(
        &self,
        request: &Request,
        context: &str,
    ) -> Result<ResponsePayload, ResponderError>;

    /// Fusion entry point. Only the unifying responder is expected to
    /// support it.
    async fn invoke_fusion(
        &self,
        _request: &Request,
        _subtype: FusionSubtype,
        _params: &BTreeMap<String, String>,
    ) -> Result<FusionOutcome, ResponderError> {
        Err(ResponderError::Unsupported(self.id()))
    }
}

/// The three responders the engine routes between
#[derive(Clone)]
pub struct ResponderSet {
    protective: Arc<dyn Responder>,
    creative: Arc<dyn Responder>,
    unifying: Arc<dyn Responder>,
}

impl ResponderSet {
    pub fn new(
        protective: Arc<dyn Responder>,
        creative: Arc<dyn Responder>,
        unifying: Arc<dyn Responder>,
    ) -> Self {
        Self {
            protective,
            creative,
            unifying,
        }
    }

    pub fn get(&self, id: ResponderId) -> &Arc<dyn Responder> {
        match id {
            ResponderId::Protective => &self.protective,
            ResponderId::Creative => &self.creative,
            ResponderId::Unifying => &self.unifying,
        }
    }
}

impl std::fmt::Debug for ResponderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderSet")
            .field("protective", &self.protective.id())
            .field("creative", &self.creative.id())
            .field("unifying", &self.unifying.id())
            .finish()
    }
}
