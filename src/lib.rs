//! Confluence: multi-responder orchestration with chained context
//!
//! Requests are classified, routed to one or more of three responders
//! (protective, creative, unifying), and their results synthesized into a
//! single answer. Each completed exchange is recorded in a context chain that
//! later requests draw on.
//!
//! # Core Concepts
//!
//! - **Routing**: an ordered keyword table decides which responders run
//! - **Fusion**: an exclusive mode where the unifying responder combines perspectives
//! - **Context chains**: append-only histories, shared as immutable snapshots
//! - **Insights**: a running record of completed requests that drives evolution
//!
//! # Example
//!
//! ```
//! use confluence::{ConfluenceConfig, Orchestrator, ResponderId, ResponderSet};
//! use confluence::responder::mock::MockResponder;
//! use std::sync::Arc;
//!
//! let responders = ResponderSet::new(
//!     Arc::new(MockResponder::echo(ResponderId::Protective)),
//!     Arc::new(MockResponder::echo(ResponderId::Creative)),
//!     Arc::new(MockResponder::echo(ResponderId::Unifying)),
//! );
//! let orchestrator = Orchestrator::new(responders, ConfluenceConfig::default());
//! assert_eq!(orchestrator.system_state().insight_count, 0);
//! ```

pub mod config;
pub mod context;
pub mod fusion;
pub mod insight;
mod orchestrator;
pub mod request;
pub mod responder;
pub mod routing;
pub mod stream;
pub mod synthesis;

pub use config::{ConfigError, ConfluenceConfig};
pub use context::{
    ChainId, ContextChain, ContextError, ContextNode, ContextQuery, ContextQueryResult,
    ContextResult, ContextStats, ContextStore, Metadata,
};
pub use fusion::{FusionError, FusionState, FusionStateMachine};
pub use insight::{
    EthicalReviewLog, EthicalReviewRecord, EvolutionEvent, InsightRecord, InsightTracker,
    LearningMode,
};
pub use orchestrator::{Orchestrator, OrchestratorError, SystemState, CHAIN_ID_ATTRIBUTE};
pub use request::{Request, RequestId};
pub use responder::{
    FusionOutcome, Responder, ResponderError, ResponderId, ResponderInvoker, ResponderSet,
    ResponsePayload,
};
pub use routing::{
    classify, ComplexityTier, FusionSubtype, Route, RoutingDecision, RoutingDispatcher,
};
pub use stream::{CancellationToken, ResponseEvent, ResponseStream};
pub use synthesis::{synthesize, SynthesizedResult, TaggedResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
