//! Result stream handed back by `process_request`, and its cancellation.
//!
//! Dropping the [`ResponseStream`] cancels the request: responder calls
//! already issued run to completion and are discarded, and no further
//! responders are invoked.

use crate::synthesis::{SynthesizedResult, TaggedResult};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Shared stop flag between a [`ResponseStream`] and the task feeding it.
///
/// Responder calls already running are not interrupted; the processing task
/// looks at the flag before issuing the next one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// One item of a request's output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    /// A single responder's result, in issue order
    Tagged(TaggedResult),
    /// The final answer; always the last event
    Synthesized(SynthesizedResult),
}

impl ResponseEvent {
    pub fn as_synthesized(&self) -> Option<&SynthesizedResult> {
        match self {
            Self::Synthesized(result) => Some(result),
            Self::Tagged(_) => None,
        }
    }

    pub fn as_tagged(&self) -> Option<&TaggedResult> {
        match self {
            Self::Tagged(result) => Some(result),
            Self::Synthesized(_) => None,
        }
    }
}

/// Consumer half: a `Stream` of [`ResponseEvent`]s
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<ResponseEvent>,
    cancel: CancellationToken,
}

impl ResponseStream {
    /// Stop the request without dropping the stream. Events already queued
    /// can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ResponseStream {
    type Item = ResponseEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Producer half, owned by the task processing the request
#[derive(Debug, Clone)]
pub(crate) struct ResponseSink {
    tx: mpsc::Sender<ResponseEvent>,
    cancel: CancellationToken,
}

impl ResponseSink {
    /// Whether the consumer has gone away or asked to stop
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Deliver an event. Returns `false` if nobody is listening any more.
    pub(crate) async fn send(&self, event: ResponseEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }
}

/// Create a connected sink/stream pair
pub(crate) fn channel(capacity: usize) -> (ResponseSink, ResponseStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    (
        ResponseSink {
            tx,
            cancel: cancel.clone(),
        },
        ResponseStream { rx, cancel },
    )
}
