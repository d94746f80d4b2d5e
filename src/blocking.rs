use std::{
    collections::VecDeque,
    io::Read,
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{
    blocking::{Client as HttpClient, RequestBuilder, Response},
    header::{HeaderName, HeaderValue, ACCEPT},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    core::{env_value, is_json_response, Endpoint},
    errors::{Error, Result, TransportError, TransportErrorKind},
    events::{InterruptEventData, WorkflowEvent},
    http::{parse_api_error_parts, request_id_from_headers, HeaderList, RequestOptions},
    sse::{parse_frame, FrameAssembler},
    stream::StreamOutcome,
    telemetry::{HttpRequestMetrics, MetricsCallbacks, RequestContext, StreamTelemetry, Telemetry},
    types::RunResponse,
    CLIENT_HEADER, DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    ENV_ACCESS_TOKEN, ENV_APP_ID, ENV_BASE_URL, ENV_WORKFLOW_ID, REQUEST_ID_HEADER, RUN_PATH,
    STREAM_RESUME_PATH, STREAM_RUN_PATH,
};

const READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Clone, Debug, Default)]
pub struct BlockingConfig {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub workflow_id: Option<String>,
    pub app_id: Option<String>,
    pub client_header: Option<String>,
    /// Must not carry a client-wide timeout if streams are expected to outlive it.
    pub http_client: Option<HttpClient>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Override the one-shot request timeout (defaults to 60s). Streams are not bounded by it.
    pub timeout: Option<Duration>,
    pub default_headers: Option<HeaderList>,
    pub metrics: Option<MetricsCallbacks>,
}

impl BlockingConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_value(ENV_BASE_URL),
            access_token: env_value(ENV_ACCESS_TOKEN),
            workflow_id: env_value(ENV_WORKFLOW_ID),
            app_id: env_value(ENV_APP_ID),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct BlockingClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: Endpoint,
    client_header: String,
    http: HttpClient,
    request_timeout: Duration,
    default_headers: Option<HeaderList>,
    telemetry: Telemetry,
}

impl BlockingClient {
    pub fn new(cfg: BlockingConfig) -> Result<Self> {
        let endpoint = Endpoint::new(cfg.base_url, cfg.access_token, cfg.workflow_id, cfg.app_id)?;
        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request_timeout = cfg.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        // reqwest's blocking client applies a 30s total timeout unless told otherwise;
        // run requests set their own and streams stay unbounded.
        let http = match cfg.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .connect_timeout(connect_timeout)
                .timeout(None::<Duration>)
                .build()
                .map_err(|err| TransportError {
                    kind: TransportErrorKind::Connect,
                    message: "failed to build http client".to_string(),
                    source: Some(err),
                })?,
        };

        let client_header = cfg
            .client_header
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_HEADER.to_string());

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                client_header,
                http,
                request_timeout,
                default_headers: cfg.default_headers,
                telemetry: Telemetry::new(cfg.metrics),
            }),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(BlockingConfig::from_env())
    }

    pub fn workflows(&self) -> BlockingWorkflowsClient {
        BlockingWorkflowsClient {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BlockingWorkflowsClient {
    inner: Arc<ClientInner>,
}

impl BlockingWorkflowsClient {
    pub fn run<P, T>(&self, parameters: &P) -> Result<RunResponse<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.run_with_options(parameters, RequestOptions::default())
    }

    pub fn run_with_options<P, T>(
        &self,
        parameters: &P,
        options: RequestOptions,
    ) -> Result<RunResponse<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.inner.endpoint.workflow_request(parameters)?;
        let mut builder = self.inner.request(RUN_PATH)?.json(&body);
        builder = self.inner.with_headers(
            builder,
            options.request_id.as_deref(),
            &options.headers,
            "application/json",
        )?;
        builder = builder.timeout(options.timeout.unwrap_or(self.inner.request_timeout));

        let ctx = self.inner.make_context(RUN_PATH, options.request_id.clone());
        let resp = self.inner.send(builder, ctx)?;
        let request_id = request_id_from_headers(resp.headers()).or(options.request_id);

        let bytes = resp
            .bytes()
            .map_err(|err| Error::Transport(TransportError::from_reqwest(err)))?;
        let mut payload = RunResponse::<T>::from_slice(&bytes)?;
        payload.request_id = request_id;
        Ok(payload)
    }

    pub fn run_stream<P>(&self, parameters: &P) -> Result<BlockingEventStream>
    where
        P: Serialize + ?Sized,
    {
        self.run_stream_with_options(parameters, RequestOptions::default())
    }

    pub fn run_stream_with_options<P>(
        &self,
        parameters: &P,
        options: RequestOptions,
    ) -> Result<BlockingEventStream>
    where
        P: Serialize + ?Sized,
    {
        let body = self.inner.endpoint.workflow_request(parameters)?;
        self.inner.open_stream(STREAM_RUN_PATH, &body, options)
    }

    pub fn resume(
        &self,
        event_id: impl Into<String>,
        resume_data: impl Into<String>,
        interrupt_type: i32,
    ) -> Result<BlockingEventStream> {
        self.resume_with_options(
            event_id,
            resume_data,
            interrupt_type,
            RequestOptions::default(),
        )
    }

    pub fn resume_with_options(
        &self,
        event_id: impl Into<String>,
        resume_data: impl Into<String>,
        interrupt_type: i32,
        options: RequestOptions,
    ) -> Result<BlockingEventStream> {
        let body = self.inner.endpoint.resume_request(
            event_id.into(),
            resume_data.into(),
            interrupt_type,
        )?;
        self.inner.open_stream(STREAM_RESUME_PATH, &body, options)
    }

    pub fn resume_interrupt(
        &self,
        interrupt: &InterruptEventData,
        resume_data: impl Into<String>,
    ) -> Result<BlockingEventStream> {
        self.resume(
            interrupt.interrupt_data.event_id.clone(),
            resume_data,
            interrupt.interrupt_data.interrupt_type,
        )
    }
}

impl ClientInner {
    fn request(&self, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint.url(path)?;
        Ok(self.http.post(url))
    }

    fn with_headers(
        &self,
        mut builder: RequestBuilder,
        request_id: Option<&str>,
        headers: &HeaderList,
        accept: &str,
    ) -> Result<RequestBuilder> {
        builder = builder
            .header(ACCEPT, accept)
            .header(CLIENT_HEADER, self.client_header.as_str())
            .bearer_auth(&self.endpoint.access_token);
        if let Some(req_id) = request_id {
            if !req_id.trim().is_empty() {
                builder = builder.header(REQUEST_ID_HEADER, req_id);
            }
        }

        let defaults = self.default_headers.iter().flat_map(|list| list.iter());
        for entry in defaults.chain(headers.iter()) {
            if !entry.is_valid() {
                continue;
            }
            let name = HeaderName::from_bytes(entry.key.trim().as_bytes())
                .map_err(|err| Error::Config(format!("invalid header name: {err}")))?;
            let val = HeaderValue::from_str(entry.value.trim())
                .map_err(|err| Error::Config(format!("invalid header value: {err}")))?;
            builder = builder.header(name, val);
        }

        Ok(builder)
    }

    fn make_context(&self, path: &str, request_id: Option<String>) -> RequestContext {
        RequestContext::new("POST", path)
            .with_workflow_id(self.endpoint.workflow_id.clone())
            .with_request_id(request_id)
    }

    fn open_stream<B: Serialize>(
        &self,
        path: &'static str,
        body: &B,
        options: RequestOptions,
    ) -> Result<BlockingEventStream> {
        let builder = self.request(path)?.json(body);
        let builder = self.with_headers(
            builder,
            options.request_id.as_deref(),
            &options.headers,
            "text/event-stream",
        )?;

        let ctx = self.make_context(path, options.request_id.clone());
        let start = Instant::now();
        let resp = self.send(builder, ctx.clone())?;
        let request_id = request_id_from_headers(resp.headers()).or(options.request_id);

        if is_json_response(resp.headers()) {
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp
                .text()
                .map_err(|err| Error::Transport(TransportError::from_reqwest(err)))?;
            return Err(parse_api_error_parts(status, &headers, body));
        }

        let telemetry = self
            .telemetry
            .stream_state(ctx.with_request_id(request_id.clone()), start);
        Ok(BlockingEventStream::new(resp, request_id, telemetry))
    }

    fn send(&self, builder: RequestBuilder, ctx: RequestContext) -> Result<Response> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "workflow.http",
            method = %ctx.method,
            path = %ctx.path,
            workflow_id = ?ctx.workflow_id,
        )
        .entered();

        let start = Instant::now();
        match builder.send() {
            Ok(resp) => {
                let status = resp.status();
                let mut http_ctx = ctx;
                if http_ctx.request_id.is_none() {
                    http_ctx.request_id = request_id_from_headers(resp.headers());
                }
                let error = (!status.is_success()).then(|| format!("http {}", status.as_u16()));
                if self.telemetry.http_enabled() {
                    self.telemetry.record_http(HttpRequestMetrics {
                        latency: start.elapsed(),
                        status: Some(status.as_u16()),
                        error,
                        context: http_ctx,
                    });
                }
                if status.is_success() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(status = %status, "request completed");
                    return Ok(resp);
                }

                #[cfg(feature = "tracing")]
                tracing::warn!(status = %status, "request failed; returning error");
                let headers = resp.headers().clone();
                let body = resp
                    .text()
                    .map_err(|err| Error::Transport(TransportError::from_reqwest(err)))?;
                Err(parse_api_error_parts(status, &headers, body))
            }
            Err(err) => {
                if self.telemetry.http_enabled() {
                    self.telemetry.record_http(HttpRequestMetrics {
                        latency: start.elapsed(),
                        status: None,
                        error: Some(err.to_string()),
                        context: ctx,
                    });
                }
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "transport error");
                Err(TransportError::from_reqwest(err).into())
            }
        }
    }
}

/// Blocking counterpart of [`crate::WorkflowEventStream`].
///
/// Reads the response body on demand as the iterator is advanced. The
/// connection is closed when iteration ends, fails, or the stream is dropped.
pub struct BlockingEventStream {
    request_id: Option<String>,
    reader: Option<Box<dyn Read + Send>>,
    assembler: FrameAssembler,
    pending: VecDeque<String>,
    buf: Vec<u8>,
    telemetry: Option<StreamTelemetry>,
}

impl BlockingEventStream {
    fn new(
        response: Response,
        request_id: Option<String>,
        telemetry: Option<StreamTelemetry>,
    ) -> Self {
        Self::from_reader(response, request_id, telemetry)
    }

    pub(crate) fn from_reader<R: Read + Send + 'static>(
        reader: R,
        request_id: Option<String>,
        telemetry: Option<StreamTelemetry>,
    ) -> Self {
        Self {
            request_id,
            reader: Some(Box::new(reader)),
            assembler: FrameAssembler::new(),
            pending: VecDeque::new(),
            buf: vec![0; READ_BUFFER_SIZE],
            telemetry,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Close the connection; subsequent calls to `next` return `None`.
    pub fn cancel(&mut self) {
        self.reader = None;
        self.pending.clear();
    }

    /// Drain the stream until it ends, interrupts, or reports an error event.
    pub fn collect_outcome(mut self) -> Result<StreamOutcome> {
        let mut outcome = StreamOutcome::default();
        for item in self.by_ref() {
            let event = item?;
            let stop = outcome.absorb(&event);
            outcome.events.push(event);
            if stop {
                break;
            }
        }
        Ok(outcome)
    }

    fn fail(&mut self, err: Error) -> Option<Result<WorkflowEvent>> {
        self.cancel();
        if let Some(t) = self.telemetry.as_ref() {
            t.on_error(&err);
        }
        Some(Err(err))
    }
}

impl Iterator for BlockingEventStream {
    type Item = Result<WorkflowEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return match parse_frame(&frame) {
                    Ok(event) => {
                        if let Some(t) = self.telemetry.as_ref() {
                            t.on_event(&event);
                        }
                        Some(Ok(event))
                    }
                    Err(err) => self.fail(err),
                };
            }

            let reader = self.reader.as_mut()?;
            match reader.read(&mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    match self.assembler.finish() {
                        Some(frame) => self.pending.push_back(frame),
                        None => return None,
                    }
                }
                Ok(n) => {
                    let frames = self.assembler.feed(&self.buf[..n]);
                    self.pending.extend(frames);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return self.fail(Error::Transport(body_read_error(err))),
            }
        }
    }
}

/// `reqwest::blocking::Response` surfaces body failures as `io::Error` wrapping a
/// `reqwest::Error`; unwrap it so timeouts and connection drops keep their kind.
fn body_read_error(err: std::io::Error) -> TransportError {
    let message = err.to_string();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<reqwest::Error>() {
            Ok(reqwest_err) => TransportError::from_reqwest(*reqwest_err),
            Err(other) => TransportError {
                kind: TransportErrorKind::Body,
                message: other.to_string(),
                source: None,
            },
        },
        None => TransportError {
            kind: TransportErrorKind::Body,
            message,
            source: None,
        },
    }
}

impl Drop for BlockingEventStream {
    fn drop(&mut self) {
        if let Some(t) = self.telemetry.take() {
            t.on_closed();
        }
    }
}
