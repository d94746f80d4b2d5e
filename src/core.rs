//! Shared runtime-agnostic logic for async and blocking clients.
//!
//! Configuration checks, request-body construction and response classification
//! live here so both transports behave identically.

use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    Url,
};
use serde::Serialize;

use crate::{
    errors::{Error, Result, ValidationError},
    types::{ResumeRequest, WorkflowRequest},
    DEFAULT_BASE_URL,
};

/// Settings every client needs, validated once at construction.
#[derive(Clone, Debug)]
pub(crate) struct Endpoint {
    base_url: String,
    pub(crate) access_token: String,
    pub(crate) workflow_id: String,
    pub(crate) app_id: String,
}

impl Endpoint {
    pub(crate) fn new(
        base_url: Option<String>,
        access_token: Option<String>,
        workflow_id: Option<String>,
        app_id: Option<String>,
    ) -> Result<Self> {
        let base = base_url
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base = base.trim().trim_end_matches('/').to_string();
        Url::parse(&base).map_err(|err| Error::Config(format!("invalid base url: {err}")))?;

        let access_token = access_token
            .as_deref()
            .map(strip_bearer)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("access token is required".to_string()))?
            .to_string();

        let workflow_id = workflow_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("workflow id is required".to_string()))?;

        Ok(Self {
            base_url: base,
            access_token,
            workflow_id,
            app_id: app_id.map(|s| s.trim().to_string()).unwrap_or_default(),
        })
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|err| Error::Config(format!("invalid path {path}: {err}")))
    }

    /// Body for run/stream-run. Parameters must serialize to something other than `null`.
    pub(crate) fn workflow_request<P>(&self, parameters: &P) -> Result<WorkflowRequest>
    where
        P: Serialize + ?Sized,
    {
        let parameters = serde_json::to_value(parameters)?;
        if parameters.is_null() {
            return Err(Error::Validation(
                ValidationError::new("parameters are required").with_field("parameters"),
            ));
        }
        Ok(WorkflowRequest {
            workflow_id: self.workflow_id.clone(),
            app_id: self.app_id.clone(),
            parameters,
        })
    }

    pub(crate) fn resume_request(
        &self,
        event_id: String,
        resume_data: String,
        interrupt_type: i32,
    ) -> Result<ResumeRequest> {
        if event_id.trim().is_empty() {
            return Err(Error::Validation(
                ValidationError::new("event id is required").with_field("event_id"),
            ));
        }
        Ok(ResumeRequest {
            event_id,
            workflow_id: self.workflow_id.clone(),
            resume_data,
            interrupt_type,
        })
    }
}

fn strip_bearer(token: &str) -> &str {
    let token = token.trim();
    token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token)
        .trim()
}

/// A streaming endpoint answered with a JSON document instead of an event stream.
pub(crate) fn is_json_response(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

/// Read an environment variable, treating empty values as unset.
pub(crate) fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
