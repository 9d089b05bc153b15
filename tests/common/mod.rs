//! Common test utilities for orchestrator scenarios
//!
//! A [`Harness`] wires an orchestrator to three mock responders and keeps a
//! handle on each responder's call log.

#![allow(dead_code)]

use confluence::responder::mock::{CallLog, MockResponder};
use confluence::{ConfluenceConfig, Orchestrator, ResponderId, ResponderSet, ResponseEvent};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub protective: CallLog,
    pub creative: CallLog,
    pub unifying: CallLog,
}

impl Harness {
    /// Echo responders, follow-up synthesis off
    pub fn echo() -> Self {
        Self::with(
            MockResponder::echo(ResponderId::Protective),
            MockResponder::echo(ResponderId::Creative),
            MockResponder::echo(ResponderId::Unifying),
            quiet_config(),
        )
    }

    pub fn with(
        protective: MockResponder,
        creative: MockResponder,
        unifying: MockResponder,
        config: ConfluenceConfig,
    ) -> Self {
        let logs = (protective.call_log(), creative.call_log(), unifying.call_log());
        let responders = ResponderSet::new(
            Arc::new(protective),
            Arc::new(creative),
            Arc::new(unifying),
        );
        Self {
            orchestrator: Orchestrator::new(responders, config),
            protective: logs.0,
            creative: logs.1,
            unifying: logs.2,
        }
    }

    /// Run a request to completion and collect every event
    pub async fn ask(&self, request: confluence::Request) -> Vec<ResponseEvent> {
        self.orchestrator.process_request(request).collect().await
    }
}

pub fn quiet_config() -> ConfluenceConfig {
    ConfluenceConfig::default().with_follow_up_synthesis(false)
}

/// The synthesized event, which must be the last one
pub fn synthesized(events: &[ResponseEvent]) -> &confluence::SynthesizedResult {
    events
        .last()
        .and_then(ResponseEvent::as_synthesized)
        .expect("stream must end with a synthesized result")
}

pub fn tagged(events: &[ResponseEvent]) -> Vec<&confluence::TaggedResult> {
    events.iter().filter_map(ResponseEvent::as_tagged).collect()
}

/// Poll `condition` for up to one second
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
