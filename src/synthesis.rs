//! Response synthesis: many tagged results in, one answer out

use crate::responder::{ResponderError, ResponderId, ResponsePayload};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Header line of every synthesized answer
pub const SYNTHESIS_HEADER: &str = "=== Synthesized Response ===";

/// Content returned when there is nothing to synthesize
pub const NO_RESULTS_SENTINEL: &str = "No responder results were available.";

/// One responder's output for one invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedResult {
    pub responder: ResponderId,
    pub content: String,
    pub confidence: f32,
    pub timestamp_ms: i64,
    pub errored: bool,
}

impl TaggedResult {
    pub fn new(responder: ResponderId, content: impl Into<String>, confidence: f32) -> Self {
        Self {
            responder,
            content: content.into(),
            confidence: clamp_confidence(confidence),
            timestamp_ms: Utc::now().timestamp_millis(),
            errored: false,
        }
    }

    pub fn from_payload(responder: ResponderId, payload: ResponsePayload) -> Self {
        Self::new(responder, payload.content, payload.confidence)
    }

    /// A zero-confidence result standing in for a failed call
    pub fn failed(responder: ResponderId, error: &ResponderError) -> Self {
        Self::failed_with(responder, error.to_string())
    }

    pub fn failed_with(responder: ResponderId, description: impl Into<String>) -> Self {
        Self {
            errored: true,
            ..Self::new(responder, description, 0.0)
        }
    }
}

/// The single answer produced from a set of tagged results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedResult {
    pub content: String,
    pub confidence: f32,
}

impl SynthesizedResult {
    pub fn new(content: impl Into<String>, confidence: f32) -> Self {
        Self {
            content: content.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// Zero-confidence result describing a failure
    pub fn failure(description: impl std::fmt::Display) -> Self {
        Self::new(format!("Request could not be completed: {description}"), 0.0)
    }
}

/// Clamp to [0, 1]; NaN counts as no confidence.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Arithmetic mean of the confidences, clamped. Empty input → 0.0.
pub fn aggregate_confidence(results: &[TaggedResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let sum: f64 = results.iter().map(|r| f64::from(r.confidence)).sum();
    clamp_confidence((sum / results.len() as f64) as f32)
}

/// Compose tagged results into one answer.
///
/// Output layout: the header, then results grouped by responder in display
/// order (unifying, protective, creative) each prefixed with its label, then
/// an aggregate confidence line.
pub fn synthesize(results: &[TaggedResult]) -> SynthesizedResult {
    if results.is_empty() {
        return SynthesizedResult::new(NO_RESULTS_SENTINEL, 0.0);
    }

    let confidence = aggregate_confidence(results);
    let mut lines = vec![SYNTHESIS_HEADER.to_string()];

    for id in ResponderId::ALL {
        for result in results.iter().filter(|r| r.responder == id) {
            if result.errored {
                lines.push(format!("[{}] (failed) {}", id.label(), result.content));
            } else {
                lines.push(format!("[{}] {}", id.label(), result.content));
            }
        }
    }

    lines.push(format!("Aggregate confidence: {confidence:.2}"));

    SynthesizedResult {
        content: lines.join("\n"),
        confidence,
    }
}
