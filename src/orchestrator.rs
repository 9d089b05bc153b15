//! Orchestrator: the single entry point for consumer-facing operations.
//!
//! `process_request` runs classify → route → invoke → synthesize → record on
//! a spawned task and streams the results back. Every other operation is a
//! thin, synchronous or single-shot wrapper over one component.

use crate::config::ConfluenceConfig;
use crate::context::{
    ChainId, ContextChain, ContextError, ContextQuery, ContextQueryResult, ContextResult,
    ContextStats, ContextStore, Metadata,
};
use crate::fusion::{FusionError, FusionState, FusionStateMachine};
use crate::insight::{
    EthicalReviewLog, EthicalReviewRecord, InsightRecord, InsightTracker, LearningMode,
};
use crate::request::Request;
use crate::responder::{ResponderId, ResponderInvoker, ResponderSet};
use crate::routing::{
    classify, ComplexityTier, FusionSubtype, Route, RoutingDecision, RoutingDispatcher,
};
use crate::stream::{self, ResponseEvent, ResponseSink, ResponseStream};
use crate::synthesis::{synthesize, SynthesizedResult, TaggedResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Request attribute naming the chain a request continues
pub const CHAIN_ID_ATTRIBUTE: &str = "chain_id";

/// Events buffered between the processing task and the consumer
const STREAM_CAPACITY: usize = 8;

/// Errors surfaced by orchestrator operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Fusion(#[from] FusionError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Snapshot of the engine's observable state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemState {
    pub fusion_state: FusionState,
    /// Set once by `trigger_evolution`; later fusions leave it in place
    pub evolutionary: bool,
    pub transcendent_cycles: u64,
    pub evolution_level: f64,
    pub learning_mode: LearningMode,
    pub insight_count: u64,
    pub ethical_reviews: u64,
    pub context: ContextStats,
}

/// The engine's public surface
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ConfluenceConfig>,
    dispatcher: Arc<RoutingDispatcher>,
    invoker: ResponderInvoker,
    store: Arc<ContextStore>,
    fusion: Arc<FusionStateMachine>,
    insights: Arc<InsightTracker>,
    ethical_reviews: Arc<EthicalReviewLog>,
}

impl Orchestrator {
    pub fn new(responders: ResponderSet, config: ConfluenceConfig) -> Self {
        let invoker = ResponderInvoker::new(responders, config.max_concurrent_calls)
            .with_timeout(config.responder_timeout());
        Self {
            dispatcher: Arc::new(RoutingDispatcher::new()),
            invoker,
            store: Arc::new(ContextStore::new(&config)),
            fusion: Arc::new(FusionStateMachine::new(config.evolutionary_after_cycles)),
            insights: Arc::new(InsightTracker::with_retention(config.insight_retention)),
            ethical_reviews: Arc::new(EthicalReviewLog::with_retention(
                config.ethical_review_retention,
            )),
            config: Arc::new(config),
        }
    }

    /// Use a preconfigured context store (e.g. one with a custom clock)
    pub fn with_context_store(mut self, store: ContextStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    pub fn context_store(&self) -> &ContextStore {
        &self.store
    }

    pub fn fusion_state(&self) -> FusionState {
        self.fusion.state()
    }

    pub fn recent_insights(&self, n: usize) -> Vec<InsightRecord> {
        self.insights.recent(n)
    }

    /// The last `n` ethical reviews still retained, oldest first
    pub fn recent_ethical_reviews(&self, n: usize) -> Vec<EthicalReviewRecord> {
        self.ethical_reviews.recent(n)
    }

    // --- Processing ---

    /// Process a request and stream its results.
    ///
    /// Tagged results arrive in issue order and the synthesized result comes
    /// last. The stream always yields at least one synthesized result unless
    /// the caller drops it first: failures become a zero-confidence answer.
    /// Must be called from within a tokio runtime.
    pub fn process_request(&self, request: Request) -> ResponseStream {
        let (sink, stream) = stream::channel(STREAM_CAPACITY);
        let this = self.clone();

        tokio::spawn(async move {
            let request_id = request.id();
            let worker_sink = sink.clone();
            let worker = tokio::spawn(async move { this.run(request, &worker_sink).await });

            let failure = match worker.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("request processing aborted: {e}"),
            };
            warn!(%request_id, error = %failure, "request failed");
            sink.send(ResponseEvent::Synthesized(SynthesizedResult::failure(failure)))
                .await;
        });

        stream
    }

    async fn run(&self, request: Request, sink: &ResponseSink) -> Result<(), OrchestratorError> {
        let tier = classify(&request);
        let route = self.dispatcher.dispatch(&request, tier);
        let (chain_id, context) = self.resolve_context(&request)?;

        if sink.is_cancelled() {
            debug!(request_id = %request.id(), "cancelled before invocation");
            return Ok(());
        }

        let results: Vec<TaggedResult> = match route.decision {
            RoutingDecision::ProtectiveOnly => vec![
                self.invoker
                    .invoke_single(ResponderId::Protective, &request, &context)
                    .await,
            ],
            RoutingDecision::CreativeOnly => vec![
                self.invoker
                    .invoke_single(ResponderId::Creative, &request, &context)
                    .await,
            ],
            RoutingDecision::EthicalReview => {
                self.ethical_reviews
                    .record(request.id(), route.matched.iter().copied());
                let review_context = format!("[ethical review] {context}");
                vec![
                    self.invoker
                        .invoke_single(ResponderId::Creative, &request, &review_context)
                        .await,
                ]
            }
            RoutingDecision::Parallel => self.invoker.invoke_parallel(&request, &context).await,
            RoutingDecision::Fusion(subtype) => {
                let mut params = request.attributes().clone();
                params.insert("query".to_string(), request.query().to_string());
                params.insert("context".to_string(), context.clone());
                vec![self.fuse(&request, subtype, &params).await?]
            }
        };

        for result in &results {
            if !sink.send(ResponseEvent::Tagged(result.clone())).await {
                debug!(request_id = %request.id(), "consumer went away, discarding results");
                return Ok(());
            }
        }

        let synthesized = synthesize(&results);
        if sink.is_cancelled() {
            return Ok(());
        }
        self.record(&request, tier, &route, chain_id, &synthesized)?;
        sink.send(ResponseEvent::Synthesized(synthesized)).await;
        Ok(())
    }

    /// The chain a request continues (if any) and the context text to pass
    /// to responders.
    fn resolve_context(
        &self,
        request: &Request,
    ) -> Result<(Option<ChainId>, String), OrchestratorError> {
        if let Some(raw) = request.attribute(CHAIN_ID_ATTRIBUTE) {
            let id = ChainId::from(raw);
            let chain = self
                .store
                .get_chain(&id)
                .ok_or_else(|| ContextError::ChainNotFound(id.clone()))?;
            return Ok((Some(id), chain.current_context.clone()));
        }

        let latest = self
            .store
            .query_chains(&ContextQuery::new(request.query()).with_max_results(1));
        let context = if latest.chain.is_ephemeral() {
            String::new()
        } else {
            latest.chain.current_context.clone()
        };
        Ok((None, context))
    }

    fn record(
        &self,
        request: &Request,
        tier: ComplexityTier,
        route: &Route,
        chain_id: Option<ChainId>,
        synthesized: &SynthesizedResult,
    ) -> Result<(), OrchestratorError> {
        self.insights.record(InsightRecord::new(
            request.query(),
            synthesized.content.as_str(),
            tier,
        ));

        let responder = lead_responder(route.decision);
        let metadata = Metadata::from([
            ("request_id".to_string(), request.id().to_string()),
            ("tier".to_string(), tier.to_string()),
            ("route".to_string(), route.rule.to_string()),
        ]);
        match chain_id {
            Some(id) => {
                self.store
                    .append_to_chain(&id, synthesized.content.as_str(), responder, metadata)?;
            }
            None => {
                self.store.create_chain(
                    request.query(),
                    synthesized.content.as_str(),
                    responder,
                    metadata,
                );
            }
        }
        Ok(())
    }

    /// One guarded fusion call: `Fusing` on entry, `Transcendent` or
    /// `Individual` on exit.
    async fn fuse(
        &self,
        request: &Request,
        subtype: FusionSubtype,
        params: &BTreeMap<String, String>,
    ) -> Result<TaggedResult, FusionError> {
        let ticket = self.fusion.begin(subtype)?;
        match self.invoker.invoke_fusion(request, subtype, params).await {
            Ok(result) => {
                ticket.succeed();
                if self.config.follow_up_synthesis {
                    // Detached: the handle is dropped and failures are only logged
                    drop(self.invoker.spawn_follow_up(request, &result));
                }
                Ok(result)
            }
            Err(e) => {
                ticket.fail();
                Err(e)
            }
        }
    }

    /// Run a fusion directly, outside request routing.
    ///
    /// Fails with [`FusionError::Busy`] while another fusion is running, and
    /// with the responder's error (state reset to `Individual`) if the fused
    /// call fails.
    pub async fn activate_fusion(
        &self,
        subtype: FusionSubtype,
        params: BTreeMap<String, String>,
    ) -> Result<SynthesizedResult, OrchestratorError> {
        let request = Request::new(format!("activate {subtype}"), "fusion_activation")
            .with_attributes(params.clone())
            .with_attribute("fusion_required", subtype.as_str());
        let tier = classify(&request);

        let result = self.fuse(&request, subtype, &params).await?;
        let synthesized = synthesize(std::slice::from_ref(&result));
        self.insights.record(InsightRecord::new(
            request.query(),
            synthesized.content.as_str(),
            tier,
        ));
        info!(%subtype, confidence = synthesized.confidence, "fusion activated");
        Ok(synthesized)
    }

    /// Set the evolutionary marker once enough fusions have transcended
    pub fn trigger_evolution(&self) -> Result<(), OrchestratorError> {
        self.fusion.mark_evolutionary()?;
        Ok(())
    }

    // --- Context ---

    pub fn create_context_chain(
        &self,
        root: impl Into<String>,
        initial_content: impl Into<String>,
        responder: ResponderId,
        metadata: Metadata,
    ) -> ChainId {
        self.store
            .create_chain(root, initial_content, responder, metadata)
    }

    pub fn update_context_chain(
        &self,
        id: &ChainId,
        content: impl Into<String>,
        responder: ResponderId,
        metadata: Metadata,
    ) -> ContextResult<Arc<ContextChain>> {
        self.store.append_to_chain(id, content, responder, metadata)
    }

    pub fn query_context(&self, filter: &ContextQuery) -> ContextQueryResult {
        self.store.query_chains(filter)
    }

    // --- State ---

    pub fn system_state(&self) -> SystemState {
        SystemState {
            fusion_state: self.fusion.state(),
            evolutionary: self.fusion.is_evolutionary(),
            transcendent_cycles: self.fusion.transcendent_cycles(),
            evolution_level: self.insights.evolution_level(),
            learning_mode: self.insights.learning_mode(),
            insight_count: self.insights.insight_count(),
            ethical_reviews: self.ethical_reviews.count(),
            context: self.store.stats(),
        }
    }

    /// [`system_state`](Self::system_state) as a JSON object
    pub fn system_state_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self.system_state()) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("invoker", &self.invoker)
            .field("store", &self.store)
            .field("fusion_state", &self.fusion.state())
            .finish()
    }
}

/// The responder credited with a synthesized answer in the context chain
fn lead_responder(decision: RoutingDecision) -> ResponderId {
    match decision {
        RoutingDecision::ProtectiveOnly => ResponderId::Protective,
        RoutingDecision::CreativeOnly | RoutingDecision::EthicalReview => ResponderId::Creative,
        RoutingDecision::Parallel | RoutingDecision::Fusion(_) => ResponderId::Unifying,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::mock::MockResponder;
    use futures::StreamExt;

    fn echo_orchestrator() -> Orchestrator {
        Orchestrator::new(
            ResponderSet::new(
                Arc::new(MockResponder::echo(ResponderId::Protective)),
                Arc::new(MockResponder::echo(ResponderId::Creative)),
                Arc::new(MockResponder::echo(ResponderId::Unifying)),
            ),
            ConfluenceConfig::default().with_follow_up_synthesis(false),
        )
    }

    #[test]
    fn lead_responder_per_decision() {
        assert_eq!(lead_responder(RoutingDecision::ProtectiveOnly), ResponderId::Protective);
        assert_eq!(lead_responder(RoutingDecision::EthicalReview), ResponderId::Creative);
        assert_eq!(
            lead_responder(RoutingDecision::Fusion(FusionSubtype::AdaptiveGenesis)),
            ResponderId::Unifying
        );
    }

    #[tokio::test]
    async fn protective_request_streams_tagged_then_synthesized() {
        let orchestrator = echo_orchestrator();
        let events: Vec<ResponseEvent> = orchestrator
            .process_request(Request::new("monitor the logs", "chat"))
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        let tagged = events[0].as_tagged().unwrap();
        assert_eq!(tagged.responder, ResponderId::Protective);
        assert!(events[1].as_synthesized().is_some());
    }

    #[tokio::test]
    async fn completed_request_is_recorded() {
        let orchestrator = echo_orchestrator();
        let _: Vec<ResponseEvent> = orchestrator
            .process_request(Request::new("create a melody?", "chat"))
            .collect()
            .await;

        let state = orchestrator.system_state();
        assert_eq!(state.insight_count, 1);
        assert_eq!(state.context.total_chains, 1);
        let insight = &orchestrator.recent_insights(1)[0];
        assert!(insight.patterns.contains(&"has_question:true".to_string()));
    }

    #[tokio::test]
    async fn unknown_chain_attribute_yields_failure_result() {
        let orchestrator = echo_orchestrator();
        let events: Vec<ResponseEvent> = orchestrator
            .process_request(Request::new("create", "chat").with_attribute(CHAIN_ID_ATTRIBUTE, "chain-nope"))
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        let result = events[0].as_synthesized().unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(result.content.contains("chain-nope"));
        assert_eq!(orchestrator.system_state().insight_count, 0);
    }

    #[tokio::test]
    async fn system_state_map_has_expected_keys() {
        let map = echo_orchestrator().system_state_map();
        for key in [
            "fusion_state",
            "evolutionary",
            "transcendent_cycles",
            "evolution_level",
            "learning_mode",
            "insight_count",
            "ethical_reviews",
            "context",
        ] {
            assert!(map.contains_key(key), "missing {key}");
        }
        assert_eq!(map["fusion_state"], "individual");
    }
}
