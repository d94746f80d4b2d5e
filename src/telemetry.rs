use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{errors::Error, events::WorkflowEvent};

/// User-provided callbacks for emitting metrics without taking on a tracing dependency.
#[derive(Clone, Default)]
pub struct MetricsCallbacks {
    pub http_request: Option<Arc<dyn Fn(HttpRequestMetrics) + Send + Sync>>,
    pub stream_first_event: Option<Arc<dyn Fn(StreamFirstEventMetrics) + Send + Sync>>,
}

impl fmt::Debug for MetricsCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCallbacks")
            .field(
                "http_request",
                &self.http_request.as_ref().map(|_| "callback"),
            )
            .field(
                "stream_first_event",
                &self.stream_first_event.as_ref().map(|_| "callback"),
            )
            .finish()
    }
}

/// Common request metadata shared by all telemetry events.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub workflow_id: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if let Some(id) = request_id {
            if !id.trim().is_empty() {
                self.request_id = Some(id);
            }
        }
        self
    }
}

/// HTTP request latency and outcome.
#[derive(Clone, Debug)]
pub struct HttpRequestMetrics {
    pub latency: Duration,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub context: RequestContext,
}

/// Time from request start to the first decoded stream event.
#[derive(Clone, Debug)]
pub struct StreamFirstEventMetrics {
    pub latency: Duration,
    pub error: Option<String>,
    pub context: RequestContext,
}

/// Internal helper that owns the registered callbacks (if any).
#[derive(Clone, Default)]
pub(crate) struct Telemetry {
    callbacks: MetricsCallbacks,
}

impl Telemetry {
    pub fn new(callbacks: Option<MetricsCallbacks>) -> Self {
        Self {
            callbacks: callbacks.unwrap_or_default(),
        }
    }

    pub fn http_enabled(&self) -> bool {
        self.callbacks.http_request.is_some()
    }

    pub fn stream_enabled(&self) -> bool {
        self.callbacks.stream_first_event.is_some()
    }

    pub fn record_http(&self, metrics: HttpRequestMetrics) {
        if let Some(cb) = &self.callbacks.http_request {
            cb(metrics);
        }
    }

    pub fn record_first_event(&self, metrics: StreamFirstEventMetrics) {
        if let Some(cb) = &self.callbacks.stream_first_event {
            cb(metrics);
        }
    }

    pub fn stream_state(&self, context: RequestContext, start: Instant) -> Option<StreamTelemetry> {
        if self.stream_enabled() || tracing_enabled() {
            return Some(StreamTelemetry::new(self.clone(), context, start));
        }
        None
    }
}

/// Per-stream metrics/tracing state shared by the async and blocking streams.
#[derive(Clone)]
pub(crate) struct StreamTelemetry {
    inner: Arc<StreamTelemetryInner>,
}

struct StreamTelemetryInner {
    telemetry: Telemetry,
    context: RequestContext,
    start: Instant,
    first_event_recorded: AtomicBool,
}

impl StreamTelemetry {
    pub fn new(telemetry: Telemetry, context: RequestContext, start: Instant) -> Self {
        Self {
            inner: Arc::new(StreamTelemetryInner {
                telemetry,
                context,
                start,
                first_event_recorded: AtomicBool::new(false),
            }),
        }
    }

    pub fn on_event(&self, event: &WorkflowEvent) {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            id = event.id,
            kind = %event.kind,
            request_id = ?self.inner.context.request_id,
            "workflow event"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = event;

        self.record_first_event(None);
    }

    pub fn on_error(&self, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, path = %self.inner.context.path, "stream error");
        self.record_first_event(Some(error.to_string()));
    }

    pub fn on_closed(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %self.inner.context.path, "stream closed");
        self.record_first_event(Some("stream closed".to_string()));
    }

    fn record_first_event(&self, error: Option<String>) {
        if !self.inner.telemetry.stream_enabled() {
            return;
        }
        if self.inner.first_event_recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .telemetry
            .record_first_event(StreamFirstEventMetrics {
                latency: self.inner.start.elapsed(),
                error,
                context: self.inner.context.clone(),
            });
    }
}

pub(crate) fn tracing_enabled() -> bool {
    #[cfg(feature = "tracing")]
    {
        tracing::enabled!(tracing::Level::DEBUG) || tracing::enabled!(tracing::Level::TRACE)
    }
    #[cfg(not(feature = "tracing"))]
    {
        false
    }
}
