use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::header::{HeaderName, HeaderValue, ACCEPT};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    core::{env_value, is_json_response, Endpoint},
    errors::{Error, Result, TransportError},
    events::InterruptEventData,
    http::{parse_api_error_parts, request_id_from_headers, HeaderList, RequestOptions},
    stream::WorkflowEventStream,
    telemetry::{HttpRequestMetrics, MetricsCallbacks, RequestContext, Telemetry},
    types::RunResponse,
    CLIENT_HEADER, DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    ENV_ACCESS_TOKEN, ENV_APP_ID, ENV_BASE_URL, ENV_WORKFLOW_ID, REQUEST_ID_HEADER, RUN_PATH,
    STREAM_RESUME_PATH, STREAM_RUN_PATH,
};

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// API origin (defaults to [`crate::DEFAULT_BASE_URL`]).
    pub base_url: Option<String>,
    /// Bearer token. A leading `Bearer ` is accepted and stripped.
    pub access_token: Option<String>,
    /// Workflow every call on this client targets.
    pub workflow_id: Option<String>,
    /// Owning app; sent as an empty string when unset.
    pub app_id: Option<String>,
    pub client_header: Option<String>,
    pub http_client: Option<reqwest::Client>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Override the one-shot request timeout (defaults to 60s). Streams are not bounded by it.
    pub timeout: Option<Duration>,
    /// Maximum wait between stream chunks (unbounded by default).
    pub stream_idle_timeout: Option<Duration>,
    /// Default extra headers applied to all requests.
    pub default_headers: Option<HeaderList>,
    /// Optional metrics callbacks (HTTP latency, time to first stream event).
    pub metrics: Option<MetricsCallbacks>,
}

impl Config {
    /// Read token, workflow id, app id and base URL from the process environment.
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
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    endpoint: Endpoint,
    client_header: String,
    http: reqwest::Client,
    request_timeout: Duration,
    stream_idle_timeout: Option<Duration>,
    default_headers: Option<HeaderList>,
    telemetry: Telemetry,
}

impl Client {
    pub fn new(cfg: Config) -> Result<Self> {
        let endpoint = Endpoint::new(cfg.base_url, cfg.access_token, cfg.workflow_id, cfg.app_id)?;
        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request_timeout = cfg.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http = match cfg.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .map_err(|err| {
                    let mut te = TransportError::from_reqwest(err);
                    te.message = format!("failed to build http client: {}", te.message);
                    te
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
                stream_idle_timeout: cfg.stream_idle_timeout,
                default_headers: cfg.default_headers,
                telemetry: Telemetry::new(cfg.metrics),
            }),
        })
    }

    /// Build a client from [`Config::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env())
    }

    pub fn workflows(&self) -> WorkflowsClient {
        WorkflowsClient {
            inner: self.inner.clone(),
        }
    }
}

fn apply_header_list(
    mut builder: reqwest::RequestBuilder,
    headers: &HeaderList,
) -> Result<reqwest::RequestBuilder> {
    for entry in headers.iter() {
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

/// Run, stream and resume the configured workflow.
#[derive(Clone)]
pub struct WorkflowsClient {
    inner: Arc<ClientInner>,
}

impl WorkflowsClient {
    /// Run the workflow to completion and decode its output into `T`.
    ///
    /// Fails with [`Error::Validation`] before any network call when `parameters`
    /// serializes to `null`.
    pub async fn run<P, T>(&self, parameters: &P) -> Result<RunResponse<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.run_with_options(parameters, RequestOptions::default())
            .await
    }

    pub async fn run_with_options<P, T>(
        &self,
        parameters: &P,
        options: RequestOptions,
    ) -> Result<RunResponse<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.inner.endpoint.workflow_request(parameters)?;
        let builder = self.inner.request(RUN_PATH)?.json(&body);
        let builder = self.inner.with_headers(
            builder,
            options.request_id.as_deref(),
            &options.headers,
            "application/json",
        )?;
        let builder = self.inner.with_timeout(builder, options.timeout);

        let ctx = self.inner.make_context(RUN_PATH, options.request_id.clone());
        let resp = self.inner.send(builder, ctx).await?;
        let request_id = request_id_from_headers(resp.headers()).or(options.request_id);

        let bytes = resp
            .bytes()
            .await
            .map_err(|err| Error::Transport(TransportError::from_reqwest(err)))?;
        let mut payload = RunResponse::<T>::from_slice(&bytes)?;
        payload.request_id = request_id;
        Ok(payload)
    }

    /// Start the workflow and stream its events as they are produced.
    pub async fn run_stream<P>(&self, parameters: &P) -> Result<WorkflowEventStream>
    where
        P: Serialize + ?Sized,
    {
        self.run_stream_with_options(parameters, RequestOptions::default())
            .await
    }

    pub async fn run_stream_with_options<P>(
        &self,
        parameters: &P,
        options: RequestOptions,
    ) -> Result<WorkflowEventStream>
    where
        P: Serialize + ?Sized,
    {
        let body = self.inner.endpoint.workflow_request(parameters)?;
        self.inner.open_stream(STREAM_RUN_PATH, &body, options).await
    }

    /// Continue an interrupted run with the caller's answer.
    pub async fn resume(
        &self,
        event_id: impl Into<String>,
        resume_data: impl Into<String>,
        interrupt_type: i32,
    ) -> Result<WorkflowEventStream> {
        self.resume_with_options(
            event_id,
            resume_data,
            interrupt_type,
            RequestOptions::default(),
        )
        .await
    }

    pub async fn resume_with_options(
        &self,
        event_id: impl Into<String>,
        resume_data: impl Into<String>,
        interrupt_type: i32,
        options: RequestOptions,
    ) -> Result<WorkflowEventStream> {
        let body = self.inner.endpoint.resume_request(
            event_id.into(),
            resume_data.into(),
            interrupt_type,
        )?;
        self.inner
            .open_stream(STREAM_RESUME_PATH, &body, options)
            .await
    }

    /// Resume the run paused by `interrupt`.
    pub async fn resume_interrupt(
        &self,
        interrupt: &InterruptEventData,
        resume_data: impl Into<String>,
    ) -> Result<WorkflowEventStream> {
        self.resume(
            interrupt.interrupt_data.event_id.clone(),
            resume_data,
            interrupt.interrupt_data.interrupt_type,
        )
        .await
    }
}

impl ClientInner {
    fn request(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self.endpoint.url(path)?;
        Ok(self.http.post(url))
    }

    fn with_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        request_id: Option<&str>,
        headers: &HeaderList,
        accept: &str,
    ) -> Result<reqwest::RequestBuilder> {
        builder = builder
            .header(ACCEPT, accept)
            .header(CLIENT_HEADER, self.client_header.as_str())
            .bearer_auth(&self.endpoint.access_token);
        if let Some(req_id) = request_id {
            if !req_id.trim().is_empty() {
                builder = builder.header(REQUEST_ID_HEADER, req_id);
            }
        }

        if let Some(defaults) = &self.default_headers {
            builder = apply_header_list(builder, defaults)?;
        }
        apply_header_list(builder, headers)
    }

    /// Bound a one-shot request; streaming calls never go through here.
    fn with_timeout(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Option<Duration>,
    ) -> reqwest::RequestBuilder {
        builder.timeout(timeout.unwrap_or(self.request_timeout))
    }

    fn make_context(&self, path: &str, request_id: Option<String>) -> RequestContext {
        RequestContext::new("POST", path)
            .with_workflow_id(self.endpoint.workflow_id.clone())
            .with_request_id(request_id)
    }

    /// POST a streaming call. Resolves once headers arrive; the body is left
    /// unread for the returned stream.
    async fn open_stream<B: Serialize>(
        &self,
        path: &'static str,
        body: &B,
        options: RequestOptions,
    ) -> Result<WorkflowEventStream> {
        let builder = self.request(path)?.json(body);
        let builder = self.with_headers(
            builder,
            options.request_id.as_deref(),
            &options.headers,
            "text/event-stream",
        )?;

        let ctx = self.make_context(path, options.request_id.clone());
        let start = Instant::now();
        let resp = self.send(builder, ctx.clone()).await?;
        let request_id = request_id_from_headers(resp.headers()).or(options.request_id);

        if is_json_response(resp.headers()) {
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp
                .text()
                .await
                .map_err(|err| Error::Transport(TransportError::from_reqwest(err)))?;
            return Err(parse_api_error_parts(status, &headers, body));
        }

        let idle_timeout = options.stream_idle_timeout.or(self.stream_idle_timeout);
        let telemetry = self
            .telemetry
            .stream_state(ctx.with_request_id(request_id.clone()), start);
        Ok(WorkflowEventStream::new(
            resp,
            request_id,
            idle_timeout,
            telemetry,
        ))
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        ctx: RequestContext,
    ) -> Result<reqwest::Response> {
        #[cfg(feature = "tracing")]
        {
            use tracing::Instrument;
            let span = tracing::debug_span!(
                "workflow.http",
                method = %ctx.method,
                path = %ctx.path,
                workflow_id = ?ctx.workflow_id,
            );
            self.send_once(builder, ctx).instrument(span).await
        }
        #[cfg(not(feature = "tracing"))]
        {
            self.send_once(builder, ctx).await
        }
    }

    /// Single attempt; failures are returned to the caller as-is.
    async fn send_once(
        &self,
        builder: reqwest::RequestBuilder,
        ctx: RequestContext,
    ) -> Result<reqwest::Response> {
        let start = Instant::now();
        match builder.send().await {
            Ok(resp) => {
                let status = resp.status();
                let mut http_ctx = ctx;
                if http_ctx.request_id.is_none() {
                    http_ctx.request_id = request_id_from_headers(resp.headers());
                }
                if status.is_success() {
                    if self.telemetry.http_enabled() {
                        self.telemetry.record_http(HttpRequestMetrics {
                            latency: start.elapsed(),
                            status: Some(status.as_u16()),
                            error: None,
                            context: http_ctx,
                        });
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        status = %status,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "request completed"
                    );
                    return Ok(resp);
                }

                if self.telemetry.http_enabled() {
                    self.telemetry.record_http(HttpRequestMetrics {
                        latency: start.elapsed(),
                        status: Some(status.as_u16()),
                        error: Some(format!("http {}", status.as_u16())),
                        context: http_ctx,
                    });
                }
                #[cfg(feature = "tracing")]
                tracing::warn!(status = %status, "request failed; returning error");
                let headers = resp.headers().clone();
                let body = resp
                    .text()
                    .await
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
