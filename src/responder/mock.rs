//! Mock responder: returns preconfigured or echoed answers.
//!
//! Used by tests and by the CLI, which has no real model behind it.

use super::{FusionOutcome, Responder, ResponderError, ResponderId, ResponsePayload};
use crate::request::Request;
use crate::routing::FusionSubtype;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Confidence reported by echo responses
pub const ECHO_CONFIDENCE: f32 = 0.75;

#[derive(Debug, Clone)]
enum Behavior {
    Echo,
    Respond(ResponsePayload),
    Fail(String),
}

#[derive(Debug, Clone)]
enum FusionBehavior {
    Echo,
    Outcome(FusionOutcome),
    Fail(String),
}

#[derive(Debug, Default)]
struct Calls {
    requests: Vec<Request>,
    contexts: Vec<String>,
    fusions: Vec<(FusionSubtype, BTreeMap<String, String>)>,
}

/// Shared record of the calls a [`MockResponder`] received
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<Calls>>,
}

impl CallLog {
    /// Ordinary `invoke` calls received
    pub fn invocations(&self) -> usize {
        self.lock().requests.len()
    }

    /// `invoke_fusion` calls received
    pub fn fusion_invocations(&self) -> usize {
        self.lock().fusions.len()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Context strings passed to `invoke`, in call order
    pub fn contexts(&self) -> Vec<String> {
        self.lock().contexts.clone()
    }

    pub fn fusions(&self) -> Vec<(FusionSubtype, BTreeMap<String, String>)> {
        self.lock().fusions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Calls> {
        // A panicking test thread must not hide the calls recorded so far
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A scripted responder
#[derive(Debug, Clone)]
pub struct MockResponder {
    id: ResponderId,
    behavior: Behavior,
    fusion: FusionBehavior,
    delay: Option<Duration>,
    log: CallLog,
}

impl MockResponder {
    fn with_behavior(id: ResponderId, behavior: Behavior) -> Self {
        Self {
            id,
            behavior,
            fusion: FusionBehavior::Echo,
            delay: None,
            log: CallLog::default(),
        }
    }

    /// Answers `[<id>] <query>` with [`ECHO_CONFIDENCE`]
    pub fn echo(id: ResponderId) -> Self {
        Self::with_behavior(id, Behavior::Echo)
    }

    /// Always answers with the given content and confidence
    pub fn responding(id: ResponderId, content: impl Into<String>, confidence: f32) -> Self {
        Self::with_behavior(id, Behavior::Respond(ResponsePayload::new(content, confidence)))
    }

    /// Always fails with `InvocationFailed`
    pub fn failing(id: ResponderId, message: impl Into<String>) -> Self {
        Self::with_behavior(id, Behavior::Fail(message.into()))
    }

    /// Sleep before answering (both entry points)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_fusion_outcome(mut self, outcome: FusionOutcome) -> Self {
        self.fusion = FusionBehavior::Outcome(outcome);
        self
    }

    pub fn with_fusion_failure(mut self, message: impl Into<String>) -> Self {
        self.fusion = FusionBehavior::Fail(message.into());
        self
    }

    /// Handle onto this responder's call record; stays valid after the
    /// responder is moved into an `Arc`.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Responder for MockResponder {
    fn id(&self) -> ResponderId {
        self.id
    }

    async fn invoke(
        &self,
        request: &Request,
        context: &str,
    ) -> Result<ResponsePayload, ResponderError> {
        {
            let mut calls = self.log.lock();
            calls.requests.push(request.clone());
            calls.contexts.push(context.to_string());
        }
        self.pause().await;

        match &self.behavior {
            Behavior::Echo => Ok(ResponsePayload::new(
                format!("[{}] {}", self.id, request.query()),
                ECHO_CONFIDENCE,
            )),
            Behavior::Respond(payload) => Ok(payload.clone()),
            Behavior::Fail(message) => Err(ResponderError::InvocationFailed(message.clone())),
        }
    }

    async fn invoke_fusion(
        &self,
        request: &Request,
        subtype: FusionSubtype,
        params: &BTreeMap<String, String>,
    ) -> Result<FusionOutcome, ResponderError> {
        self.log.lock().fusions.push((subtype, params.clone()));
        self.pause().await;

        match &self.fusion {
            FusionBehavior::Echo => Ok(FusionOutcome::succeeded([
                ("content", format!("[{subtype}] {}", request.query())),
                ("confidence", "0.9".to_string()),
            ])),
            FusionBehavior::Outcome(outcome) => Ok(outcome.clone()),
            FusionBehavior::Fail(message) => Err(ResponderError::InvocationFailed(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_prefixes_responder_id() {
        let responder = MockResponder::echo(ResponderId::Protective);
        let payload = responder
            .invoke(&Request::new("scan ports", "chat"), "")
            .await
            .unwrap();
        assert_eq!(payload.content, "[protective] scan ports");
        assert_eq!(payload.confidence, ECHO_CONFIDENCE);
    }

    #[tokio::test]
    async fn failing_responder_errors() {
        let responder = MockResponder::failing(ResponderId::Creative, "no muse");
        let err = responder
            .invoke(&Request::new("q", "chat"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, ResponderError::InvocationFailed(m) if m == "no muse"));
    }

    #[tokio::test]
    async fn call_log_survives_move() {
        let responder = MockResponder::echo(ResponderId::Unifying);
        let log = responder.call_log();
        let shared: Arc<dyn Responder> = Arc::new(responder);

        shared.invoke(&Request::new("a", "chat"), "ctx-a").await.unwrap();
        shared
            .invoke_fusion(
                &Request::new("b", "fusion"),
                FusionSubtype::InterfaceForge,
                &BTreeMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(log.invocations(), 1);
        assert_eq!(log.contexts(), vec!["ctx-a".to_string()]);
        assert_eq!(log.fusion_invocations(), 1);
        assert_eq!(log.fusions()[0].0, FusionSubtype::InterfaceForge);
    }

    #[tokio::test]
    async fn echo_fusion_reports_subtype() {
        let responder = MockResponder::echo(ResponderId::Unifying);
        let outcome = responder
            .invoke_fusion(
                &Request::new("weave", "fusion"),
                FusionSubtype::ChronoSculptor,
                &BTreeMap::new(),
            )
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.content(), "[chrono_sculptor] weave");
    }
}
