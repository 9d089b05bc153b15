//! Complexity classifier

use crate::request::Request;
use serde::{Deserialize, Serialize};

/// Attribute count above which a request is always transcendent
const TRANSCENDENT_ATTRIBUTE_THRESHOLD: usize = 10;

/// Coarse complexity tier of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
    Transcendent,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Transcendent => "transcendent",
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a request. First matching rule wins:
///
/// 1. more than 10 attributes → `Transcendent`
/// 2. a `fusion_required` attribute → `Complex`
/// 3. `kind` contains "analysis" (any case) → `Moderate`
/// 4. otherwise `Simple`
pub fn classify(request: &Request) -> ComplexityTier {
    if request.attributes().len() > TRANSCENDENT_ATTRIBUTE_THRESHOLD {
        ComplexityTier::Transcendent
    } else if request.attributes().contains_key("fusion_required") {
        ComplexityTier::Complex
    } else if request.kind().to_lowercase().contains("analysis") {
        ComplexityTier::Moderate
    } else {
        ComplexityTier::Simple
    }
}
