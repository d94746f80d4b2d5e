use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::{stream, StreamExt};

use crate::{
    errors::{Error, Result, StreamTimeoutError, StreamTimeoutKind, TransportError},
    events::{ErrorEventData, InterruptEventData, WorkflowEvent, WorkflowEventData},
    sse::{parse_frame, FrameAssembler},
    telemetry::StreamTelemetry,
};

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Lazy, single-pass sequence of events from a streaming workflow call.
///
/// Frames are decoded as the caller polls; nothing is read ahead of demand.
/// The underlying connection is released when the stream ends, fails, is
/// cancelled, or is dropped.
pub struct WorkflowEventStream {
    request_id: Option<String>,
    stream: Pin<Box<dyn Stream<Item = Result<WorkflowEvent>> + Send>>,
    cancelled: Arc<AtomicBool>,
    telemetry: Option<StreamTelemetry>,
}

impl WorkflowEventStream {
    pub(crate) fn new(
        response: reqwest::Response,
        request_id: Option<String>,
        idle_timeout: Option<Duration>,
        telemetry: Option<StreamTelemetry>,
    ) -> Self {
        Self::from_body(
            response.bytes_stream(),
            request_id,
            idle_timeout,
            telemetry,
        )
    }

    pub(crate) fn from_body<S>(
        body: S,
        request_id: Option<String>,
        idle_timeout: Option<Duration>,
        telemetry: Option<StreamTelemetry>,
    ) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let stream = build_event_stream(
            Box::pin(body),
            idle_timeout,
            cancelled.clone(),
            telemetry.clone(),
        );
        Self {
            request_id,
            stream: Box::pin(stream),
            cancelled,
            telemetry,
        }
    }

    /// Build a stream from already-decoded events (useful for tests/mocks).
    pub fn from_events(events: impl IntoIterator<Item = WorkflowEvent>) -> Self {
        let collected: Vec<Result<WorkflowEvent>> = events.into_iter().map(Ok).collect();
        Self {
            request_id: None,
            stream: Box::pin(stream::iter(collected)),
            cancelled: Arc::new(AtomicBool::new(false)),
            telemetry: None,
        }
    }

    /// Request identifier returned by the server (if any).
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Stop the stream; the next poll yields `None` and releases the connection.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Drain the stream until it ends, interrupts, or reports an error event.
    pub async fn collect(mut self) -> Result<StreamOutcome> {
        let mut outcome = StreamOutcome::default();
        while let Some(item) = self.next().await {
            let event = item?;
            let stop = outcome.absorb(&event);
            outcome.events.push(event);
            if stop {
                break;
            }
        }
        Ok(outcome)
    }
}

impl Drop for WorkflowEventStream {
    fn drop(&mut self) {
        self.cancel();
        if let Some(t) = self.telemetry.take() {
            t.on_closed();
        }
    }
}

impl Stream for WorkflowEventStream {
    type Item = Result<WorkflowEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

/// Aggregate of a drained stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    /// Message contents concatenated in arrival order.
    pub content: String,
    /// Set when the run paused and needs resume data.
    pub interrupt: Option<InterruptEventData>,
    /// Set when the server reported a workflow error.
    pub error: Option<ErrorEventData>,
    pub events: Vec<WorkflowEvent>,
}

impl StreamOutcome {
    /// Fold one event in; returns `true` when collection should stop.
    pub(crate) fn absorb(&mut self, event: &WorkflowEvent) -> bool {
        match &event.data {
            WorkflowEventData::Message(message) => {
                self.content.push_str(&message.content);
                false
            }
            WorkflowEventData::Interrupt(interrupt) => {
                self.interrupt = Some(interrupt.clone());
                true
            }
            WorkflowEventData::Error(error) => {
                self.error = Some(error.clone());
                true
            }
            WorkflowEventData::Raw(_) | WorkflowEventData::None => false,
        }
    }
}

struct StreamState {
    body: Option<BodyStream>,
    assembler: FrameAssembler,
    pending: VecDeque<String>,
    idle_timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    telemetry: Option<StreamTelemetry>,
}

impl StreamState {
    /// Drop the body (closing the connection) and report the terminal error.
    fn fail(mut self, err: Error) -> Option<(Result<WorkflowEvent>, StreamState)> {
        self.body = None;
        self.pending.clear();
        if let Some(t) = self.telemetry.as_ref() {
            t.on_error(&err);
        }
        Some((Err(err), self))
    }

    fn close(self) -> Option<(Result<WorkflowEvent>, StreamState)> {
        if let Some(t) = self.telemetry.as_ref() {
            t.on_closed();
        }
        None
    }
}

fn build_event_stream(
    body: BodyStream,
    idle_timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    telemetry: Option<StreamTelemetry>,
) -> impl Stream<Item = Result<WorkflowEvent>> + Send {
    let state = StreamState {
        body: Some(body),
        assembler: FrameAssembler::new(),
        pending: VecDeque::new(),
        idle_timeout,
        cancelled,
        telemetry,
    };

    // Fused: polls after the end or a terminal error keep returning `None`.
    stream::unfold(state, |mut state| async move {
        loop {
            if state.cancelled.load(Ordering::SeqCst) {
                return state.close();
            }
            if let Some(frame) = state.pending.pop_front() {
                return match parse_frame(&frame) {
                    Ok(event) => {
                        if let Some(t) = state.telemetry.as_ref() {
                            t.on_event(&event);
                        }
                        Some((Ok(event), state))
                    }
                    Err(err) => state.fail(err),
                };
            }

            let idle_timeout = state.idle_timeout;
            let Some(body) = state.body.as_mut() else {
                return state.close();
            };
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        return state.fail(Error::StreamTimeout(StreamTimeoutError {
                            kind: StreamTimeoutKind::Idle,
                            timeout: limit,
                        }));
                    }
                },
                None => body.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    let frames = state.assembler.feed(&chunk);
                    state.pending.extend(frames);
                }
                Some(Err(err)) => {
                    return state.fail(TransportError::from_reqwest(err).into());
                }
                None => {
                    state.body = None;
                    if let Some(frame) = state.assembler.finish() {
                        state.pending.push_back(frame);
                    }
                }
            }
        }
    })
    .fuse()
}
