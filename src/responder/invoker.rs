//! Responder invoker: bounded fan-out / fan-in over the responder set
//!
//! Every call holds a semaphore permit, so the number of responder calls in
//! flight never exceeds the configured limit. One responder's failure never
//! affects another: ordinary failures come back as errored
//! [`TaggedResult`]s. Fusion failures are the exception and propagate as
//! [`FusionError`].

use super::{Responder, ResponderError, ResponderId, ResponderSet};
use crate::fusion::FusionError;
use crate::request::Request;
use crate::routing::FusionSubtype;
use crate::synthesis::TaggedResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Issue order for the parallel path
const PARALLEL_RESPONDERS: [ResponderId; 2] = [ResponderId::Protective, ResponderId::Creative];

/// Invokes responders with bounded concurrency
#[derive(Debug, Clone)]
pub struct ResponderInvoker {
    responders: ResponderSet,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl ResponderInvoker {
    pub fn new(responders: ResponderSet, max_concurrent_calls: usize) -> Self {
        Self {
            responders,
            permits: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
            timeout: None,
        }
    }

    /// Impose a per-call timeout on top of the responders' own
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn responders(&self) -> &ResponderSet {
        &self.responders
    }

    /// Calls currently allowed to start without waiting
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Invoke exactly one responder and wait for it.
    pub async fn invoke_single(
        &self,
        id: ResponderId,
        request: &Request,
        context: &str,
    ) -> TaggedResult {
        call(
            self.responders.get(id).clone(),
            self.permits.clone(),
            self.timeout,
            request,
            context,
        )
        .await
    }

    /// Invoke protective and creative concurrently.
    ///
    /// Both calls are spawned before either is awaited. Results come back in
    /// issue order (protective, then creative).
    pub async fn invoke_parallel(&self, request: &Request, context: &str) -> Vec<TaggedResult> {
        let handles: Vec<(ResponderId, JoinHandle<TaggedResult>)> = PARALLEL_RESPONDERS
            .into_iter()
            .map(|id| (id, self.spawn_call(id, request.clone(), context.to_string())))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(responder = %id, error = %e, "responder task did not complete");
                    results.push(TaggedResult::failed_with(
                        id,
                        format!("responder task did not complete: {e}"),
                    ));
                }
            }
        }
        results
    }

    /// Call the unifying responder's fusion entry point.
    ///
    /// Unlike the other paths, failures propagate.
    pub async fn invoke_fusion(
        &self,
        request: &Request,
        subtype: FusionSubtype,
        params: &BTreeMap<String, String>,
    ) -> Result<TaggedResult, FusionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| FusionError::Responder {
                subtype,
                source: ResponderError::Unavailable(format!("semaphore closed: {e}")),
            })?;

        let unifying = self.responders.get(ResponderId::Unifying);
        let outcome = with_timeout(
            self.timeout,
            unifying.invoke_fusion(request, subtype, params),
        )
        .await
        .map_err(|source| FusionError::Responder { subtype, source })?;

        if !outcome.success {
            return Err(FusionError::Declined(subtype));
        }
        debug!(request_id = %request.id(), %subtype, "fusion call succeeded");
        Ok(TaggedResult::new(
            ResponderId::Unifying,
            outcome.content(),
            outcome.confidence(),
        ))
    }

    /// Spawn a best-effort synthesis follow-up on the unifying responder.
    ///
    /// The returned handle may be dropped; failures are only logged.
    pub fn spawn_follow_up(&self, origin: &Request, fused: &TaggedResult) -> JoinHandle<()> {
        let follow_up = Request::new(
            format!("Synthesize and consolidate: {}", fused.content),
            "fusion_synthesis",
        )
        .with_attribute("origin_request", origin.id().to_string())
        .cleared();
        let context = fused.content.clone();
        let unifying = self.responders.get(ResponderId::Unifying).clone();
        let permits = self.permits.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let result = call(unifying, permits, timeout, &follow_up, &context).await;
            if result.errored {
                warn!(
                    request_id = %follow_up.id(),
                    error = %result.content,
                    "follow-up synthesis failed"
                );
            } else {
                debug!(
                    request_id = %follow_up.id(),
                    confidence = result.confidence,
                    "follow-up synthesis completed"
                );
            }
        })
    }

    fn spawn_call(
        &self,
        id: ResponderId,
        request: Request,
        context: String,
    ) -> JoinHandle<TaggedResult> {
        let responder = self.responders.get(id).clone();
        let permits = self.permits.clone();
        let timeout = self.timeout;
        tokio::spawn(async move { call(responder, permits, timeout, &request, &context).await })
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, ResponderError>>,
) -> Result<T, ResponderError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(ResponderError::Timeout(limit.as_millis() as u64))),
        None => fut.await,
    }
}

/// One permit-bounded call; failures become errored results.
async fn call(
    responder: Arc<dyn Responder>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    request: &Request,
    context: &str,
) -> TaggedResult {
    let id = responder.id();
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            return TaggedResult::failed(
                id,
                &ResponderError::Unavailable(format!("semaphore closed: {e}")),
            )
        }
    };

    match with_timeout(timeout, responder.invoke(request, context)).await {
        Ok(payload) => {
            debug!(request_id = %request.id(), responder = %id, "responder answered");
            TaggedResult::from_payload(id, payload)
        }
        Err(e) => {
            warn!(request_id = %request.id(), responder = %id, error = %e, "responder failed");
            TaggedResult::failed(id, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::mock::MockResponder;
    use crate::responder::FusionOutcome;

    fn set(protective: MockResponder, creative: MockResponder, unifying: MockResponder) -> ResponderSet {
        ResponderSet::new(Arc::new(protective), Arc::new(creative), Arc::new(unifying))
    }

    fn echo_set() -> ResponderSet {
        set(
            MockResponder::echo(ResponderId::Protective),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying),
        )
    }

    #[tokio::test]
    async fn single_invocation_tags_result() {
        let invoker = ResponderInvoker::new(echo_set(), 2);
        let result = invoker
            .invoke_single(ResponderId::Creative, &Request::new("paint", "chat"), "")
            .await;
        assert_eq!(result.responder, ResponderId::Creative);
        assert!(!result.errored);
        assert!(result.content.contains("paint"));
    }

    #[tokio::test]
    async fn single_failure_becomes_errored_result() {
        let responders = set(
            MockResponder::failing(ResponderId::Protective, "offline"),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying),
        );
        let invoker = ResponderInvoker::new(responders, 2);
        let result = invoker
            .invoke_single(ResponderId::Protective, &Request::new("q", "chat"), "")
            .await;
        assert!(result.errored);
        assert_eq!(result.confidence, 0.0);
        assert!(result.content.contains("offline"));
    }

    #[tokio::test]
    async fn parallel_failure_does_not_cancel_sibling() {
        let responders = set(
            MockResponder::failing(ResponderId::Protective, "boom"),
            MockResponder::responding(ResponderId::Creative, "art", 0.7)
                .with_delay(Duration::from_millis(20)),
            MockResponder::echo(ResponderId::Unifying),
        );
        let invoker = ResponderInvoker::new(responders, 4);
        let results = invoker
            .invoke_parallel(&Request::new("q", "chat"), "ctx")
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].responder, ResponderId::Protective);
        assert!(results[0].errored);
        assert_eq!(results[1].responder, ResponderId::Creative);
        assert_eq!(results[1].content, "art");
    }

    #[tokio::test]
    async fn parallel_calls_overlap() {
        let delay = Duration::from_millis(100);
        let responders = set(
            MockResponder::echo(ResponderId::Protective).with_delay(delay),
            MockResponder::echo(ResponderId::Creative).with_delay(delay),
            MockResponder::echo(ResponderId::Unifying),
        );
        let invoker = ResponderInvoker::new(responders, 4);

        let started = std::time::Instant::now();
        let results = invoker.invoke_parallel(&Request::new("q", "chat"), "").await;
        assert_eq!(results.len(), 2);
        assert!(started.elapsed() < delay * 2, "calls ran sequentially");
    }

    #[tokio::test]
    async fn results_keep_issue_order_even_when_creative_finishes_first() {
        let responders = set(
            MockResponder::echo(ResponderId::Protective).with_delay(Duration::from_millis(50)),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying),
        );
        let invoker = ResponderInvoker::new(responders, 4);
        let results = invoker.invoke_parallel(&Request::new("q", "chat"), "").await;
        let order: Vec<_> = results.iter().map(|r| r.responder).collect();
        assert_eq!(order, vec![ResponderId::Protective, ResponderId::Creative]);
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let delay = Duration::from_millis(60);
        let responders = set(
            MockResponder::echo(ResponderId::Protective).with_delay(delay),
            MockResponder::echo(ResponderId::Creative).with_delay(delay),
            MockResponder::echo(ResponderId::Unifying),
        );
        let invoker = ResponderInvoker::new(responders, 1);

        let started = std::time::Instant::now();
        invoker.invoke_parallel(&Request::new("q", "chat"), "").await;
        assert!(started.elapsed() >= delay * 2, "limit of one was exceeded");
        assert_eq!(invoker.available_permits(), 1);
    }

    #[tokio::test]
    async fn invoker_timeout_turns_slow_call_into_error() {
        let responders = set(
            MockResponder::echo(ResponderId::Protective).with_delay(Duration::from_millis(200)),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying),
        );
        let invoker = ResponderInvoker::new(responders, 2)
            .with_timeout(Some(Duration::from_millis(10)));
        let result = invoker
            .invoke_single(ResponderId::Protective, &Request::new("q", "chat"), "")
            .await;
        assert!(result.errored);
        assert!(result.content.contains("timed out"));
    }

    #[tokio::test]
    async fn fusion_success_is_tagged_unifying() {
        let responders = set(
            MockResponder::echo(ResponderId::Protective),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying).with_fusion_outcome(
                FusionOutcome::succeeded([("content", "fused"), ("confidence", "0.8")]),
            ),
        );
        let invoker = ResponderInvoker::new(responders, 2);
        let result = invoker
            .invoke_fusion(
                &Request::new("q", "chat"),
                FusionSubtype::InterfaceForge,
                &BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.responder, ResponderId::Unifying);
        assert_eq!(result.content, "fused");
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn fusion_failure_propagates() {
        let responders = set(
            MockResponder::echo(ResponderId::Protective),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying).with_fusion_failure("model crashed"),
        );
        let invoker = ResponderInvoker::new(responders, 2);
        let err = invoker
            .invoke_fusion(
                &Request::new("q", "chat"),
                FusionSubtype::ChronoSculptor,
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FusionError::Responder { subtype: FusionSubtype::ChronoSculptor, .. }
        ));
    }

    #[tokio::test]
    async fn declined_fusion_is_an_error() {
        let responders = set(
            MockResponder::echo(ResponderId::Protective),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying).with_fusion_outcome(FusionOutcome::declined()),
        );
        let invoker = ResponderInvoker::new(responders, 2);
        let err = invoker
            .invoke_fusion(
                &Request::new("q", "chat"),
                FusionSubtype::AdaptiveGenesis,
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FusionError::Declined(FusionSubtype::AdaptiveGenesis)));
    }

    #[tokio::test]
    async fn follow_up_failure_is_contained() {
        let unifying = MockResponder::failing(ResponderId::Unifying, "no capacity");
        let calls = unifying.call_log();
        let invoker = ResponderInvoker::new(
            set(
                MockResponder::echo(ResponderId::Protective),
                MockResponder::echo(ResponderId::Creative),
                unifying,
            ),
            2,
        );

        let fused = TaggedResult::new(ResponderId::Unifying, "fused", 0.9);
        let handle = invoker.spawn_follow_up(&Request::new("q", "chat"), &fused);
        handle.await.unwrap();
        assert_eq!(calls.invocations(), 1);
    }

    #[tokio::test]
    async fn follow_up_is_a_cleared_synthesis_request() {
        let unifying = MockResponder::echo(ResponderId::Unifying);
        let log = unifying.call_log();
        let invoker = ResponderInvoker::new(
            set(
                MockResponder::echo(ResponderId::Protective),
                MockResponder::echo(ResponderId::Creative),
                unifying,
            ),
            2,
        );
        let fused = TaggedResult::new(ResponderId::Unifying, "exploit the design", 0.9);
        invoker
            .spawn_follow_up(&Request::new("q", "chat"), &fused)
            .await
            .unwrap();

        let requests = log.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].ethics_cleared());
        assert_eq!(requests[0].kind(), "fusion_synthesis");

        // The fused text mentions "exploit"; routed again it must not bounce
        // back into ethical review.
        let route = crate::routing::RoutingDispatcher::new()
            .dispatch(&requests[0], crate::routing::classify(&requests[0]));
        assert_ne!(route.decision, crate::routing::RoutingDecision::EthicalReview);
    }
}
