//! Routing table and dispatcher
//!
//! The row order is the tie-break order. The ethical gate comes first so it
//! dominates every other signal; fusion triggers are more specific than the
//! single-keyword persona rows and are checked before them.

use super::classifier::ComplexityTier;
use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Keywords that send a request to ethical review
pub const ETHICAL_KEYWORDS: &[&str] = &[
    "hack",
    "bypass",
    "exploit",
    "privacy",
    "personal data",
    "unauthorized",
    "illegal",
    "harmful",
    "malicious",
];

const PROTECTIVE_KEYWORDS: &[&str] = &["secure", "analyze", "protect", "monitor"];
const CREATIVE_KEYWORDS: &[&str] = &["create", "design", "artistic", "innovative"];

/// Flavour of fusion requested from the unifying responder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionSubtype {
    InterfaceForge,
    ChronoSculptor,
    HyperCreationEngine,
    AdaptiveGenesis,
}

impl FusionSubtype {
    pub const ALL: [FusionSubtype; 4] = [
        Self::InterfaceForge,
        Self::ChronoSculptor,
        Self::HyperCreationEngine,
        Self::AdaptiveGenesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterfaceForge => "interface_forge",
            Self::ChronoSculptor => "chrono_sculptor",
            Self::HyperCreationEngine => "hyper_creation_engine",
            Self::AdaptiveGenesis => "adaptive_genesis",
        }
    }
}

impl std::fmt::Display for FusionSubtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionSubtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|subtype| subtype.as_str() == s)
            .ok_or_else(|| format!("unknown fusion subtype: {s}"))
    }
}

/// Where a request goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "subtype", rename_all = "snake_case")]
pub enum RoutingDecision {
    ProtectiveOnly,
    CreativeOnly,
    Fusion(FusionSubtype),
    Parallel,
    EthicalReview,
}

impl RoutingDecision {
    pub fn fusion_subtype(&self) -> Option<FusionSubtype> {
        match self {
            Self::Fusion(subtype) => Some(*subtype),
            _ => None,
        }
    }
}

/// One row of the routing table.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    /// Stable name, reported alongside the decision
    pub name: &'static str,
    /// Predicate over the lower-cased query
    pub predicate: fn(&str) -> bool,
    pub decision: RoutingDecision,
    /// Rows marked as the ethical gate are skipped for cleared requests
    pub ethical_gate: bool,
    /// Keywords the predicate looks for; the ones present are reported
    pub keywords: &'static [&'static str],
}

impl RoutingRule {
    fn new(
        name: &'static str,
        keywords: &'static [&'static str],
        predicate: fn(&str) -> bool,
        decision: RoutingDecision,
    ) -> Self {
        Self {
            name,
            predicate,
            decision,
            ethical_gate: false,
            keywords,
        }
    }

    fn matched_keywords(&self, lowered_query: &str) -> Vec<&'static str> {
        self.keywords
            .iter()
            .copied()
            .filter(|k| lowered_query.contains(k))
            .collect()
    }
}

/// A routing decision together with the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub decision: RoutingDecision,
    pub rule: &'static str,
    /// Keywords of the winning rule found in the query; empty for the fallback
    pub matched: Vec<&'static str>,
}

/// Ordered `(predicate, decision)` rows evaluated top-down, with a fallback.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
    fallback: RoutingDecision,
}

fn contains_any(query: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| query.contains(k))
}

impl RoutingTable {
    /// The standard table:
    ///
    /// 1. ethical gate → `EthicalReview`
    /// 2. fusion triggers (interface/ui, analysis+creative, generate+code, adaptive/learn)
    /// 3. secure+creative or analyze+design → `Parallel`
    /// 4. protective keywords → `ProtectiveOnly`
    /// 5. creative keywords → `CreativeOnly`
    /// 6. fallback → `Fusion(adaptive_genesis)`
    pub fn standard() -> Self {
        use FusionSubtype::*;
        use RoutingDecision::*;

        let rules = vec![
            RoutingRule {
                ethical_gate: true,
                ..RoutingRule::new(
                    "ethical_gate",
                    ETHICAL_KEYWORDS,
                    |q| contains_any(q, ETHICAL_KEYWORDS),
                    EthicalReview,
                )
            },
            RoutingRule::new(
                "fusion:interface_forge",
                &["interface", "ui"],
                |q| q.contains("interface") || q.contains("ui"),
                Fusion(InterfaceForge),
            ),
            RoutingRule::new(
                "fusion:chrono_sculptor",
                &["analysis", "creative"],
                |q| q.contains("analysis") && q.contains("creative"),
                Fusion(ChronoSculptor),
            ),
            RoutingRule::new(
                "fusion:hyper_creation_engine",
                &["generate", "code"],
                |q| q.contains("generate") && q.contains("code"),
                Fusion(HyperCreationEngine),
            ),
            RoutingRule::new(
                "fusion:adaptive_genesis",
                &["adaptive", "learn"],
                |q| q.contains("adaptive") || q.contains("learn"),
                Fusion(AdaptiveGenesis),
            ),
            RoutingRule::new(
                "parallel",
                &["secure", "creative", "analyze", "design"],
                |q| {
                    (q.contains("secure") && q.contains("creative"))
                        || (q.contains("analyze") && q.contains("design"))
                },
                Parallel,
            ),
            RoutingRule::new(
                "protective",
                PROTECTIVE_KEYWORDS,
                |q| contains_any(q, PROTECTIVE_KEYWORDS),
                ProtectiveOnly,
            ),
            RoutingRule::new(
                "creative",
                CREATIVE_KEYWORDS,
                |q| contains_any(q, CREATIVE_KEYWORDS),
                CreativeOnly,
            ),
        ];

        Self {
            rules,
            fallback: Fusion(AdaptiveGenesis),
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Evaluate the table against a lower-cased query
    pub fn evaluate(&self, lowered_query: &str, skip_ethical_gate: bool) -> Route {
        self.rules
            .iter()
            .filter(|rule| !(skip_ethical_gate && rule.ethical_gate))
            .find(|rule| (rule.predicate)(lowered_query))
            .map(|rule| Route {
                decision: rule.decision,
                rule: rule.name,
                matched: rule.matched_keywords(lowered_query),
            })
            .unwrap_or_else(|| Route {
                decision: self.fallback,
                rule: "default",
                matched: Vec::new(),
            })
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Maps a request and its tier to a routing decision
#[derive(Debug, Clone, Default)]
pub struct RoutingDispatcher {
    table: RoutingTable,
}

impl RoutingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: RoutingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn dispatch(&self, request: &Request, tier: ComplexityTier) -> Route {
        let lowered = request.query().to_lowercase();
        let route = self.table.evaluate(&lowered, request.ethics_cleared());
        debug!(
            request_id = %request.id(),
            %tier,
            rule = route.rule,
            decision = ?route.decision,
            "routed request"
        );
        route
    }
}
