//! Rust client for the workflow API: run a workflow once, stream its events,
//! and resume a run that paused on an interrupt.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use serde_json::json;
//! use workflow_client::{Client, Config};
//!
//! # async fn demo() -> workflow_client::Result<()> {
//! let client = Client::new(Config {
//!     access_token: Some("pat_xxx".into()),
//!     workflow_id: Some("7400000000000000000".into()),
//!     ..Default::default()
//! })?;
//!
//! let mut stream = client
//!     .workflows()
//!     .run_stream(&json!({ "input": "hello" }))
//!     .await?;
//! while let Some(event) = stream.next().await {
//!     let event = event?;
//!     if let Some(message) = event.message() {
//!         print!("{}", message.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::result_large_err)]

use std::time::Duration;

/// Default API origin.
pub const DEFAULT_BASE_URL: &str = "https://api.coze.cn";

/// One-shot run endpoint.
pub const RUN_PATH: &str = "/v1/workflow/run";

/// Streaming run endpoint.
pub const STREAM_RUN_PATH: &str = "/v1/workflow/stream_run";

/// Streaming resume endpoint.
pub const STREAM_RESUME_PATH: &str = "/v1/workflow/stream_resume";

/// Default client identification header value.
pub(crate) const DEFAULT_CLIENT_HEADER: &str =
    concat!("workflow-client-rust/", env!("CARGO_PKG_VERSION"));

/// HTTP header carrying the client identification.
pub(crate) const CLIENT_HEADER: &str = "X-Workflow-Client";

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default one-shot request timeout (60 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP header name for request ID tracing.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Log id header the API returns on every response.
pub const LOG_ID_HEADER: &str = "X-Tt-Logid";

pub const ENV_ACCESS_TOKEN: &str = "WORKFLOW_API_TOKEN";
pub const ENV_WORKFLOW_ID: &str = "WORKFLOW_ID";
pub const ENV_APP_ID: &str = "WORKFLOW_APP_ID";
pub const ENV_BASE_URL: &str = "WORKFLOW_BASE_URL";

#[cfg(feature = "blocking")]
mod blocking;
mod client;
mod core;
mod errors;
mod events;
mod http;
mod sse;
mod stream;
mod telemetry;
mod types;

#[cfg(feature = "blocking")]
#[cfg_attr(docsrs, doc(cfg(feature = "blocking")))]
pub use blocking::{BlockingClient, BlockingConfig, BlockingEventStream, BlockingWorkflowsClient};
pub use client::{Client, Config, WorkflowsClient};
pub use errors::{
    APIError, Error, Result, StreamTimeoutError, StreamTimeoutKind, TransportError,
    TransportErrorKind, ValidationError,
};
pub use events::{
    ErrorEventData, InterruptData, InterruptEventData, MessageEventData, WorkflowEvent,
    WorkflowEventData, WorkflowEventKind,
};
pub use http::{HeaderEntry, HeaderList, RequestOptions};
pub use sse::{parse_frame, FrameAssembler};
pub use stream::{StreamOutcome, WorkflowEventStream};
pub use telemetry::{HttpRequestMetrics, MetricsCallbacks, RequestContext, StreamFirstEventMetrics};
pub use types::{ResumeRequest, RunResponse, WorkflowRequest};
