use std::time::Duration;

use reqwest::{header::HeaderMap, StatusCode};
use serde_json::Value;

use crate::{
    errors::{APIError, Error},
    LOG_ID_HEADER, REQUEST_ID_HEADER,
};

/// Per-call overrides for workflow requests.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub request_id: Option<String>,
    pub headers: HeaderList,
    /// Overall timeout for the one-shot `run` call. Ignored by streaming calls.
    pub timeout: Option<Duration>,
    /// Maximum wait between body chunks on a streaming call.
    pub stream_idle_timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderEntry::new(key.into(), value.into()));
        self
    }

    /// Override the overall request timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound the time between frames for this streaming call.
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = Some(timeout);
        self
    }
}

/// Structured header list with validation.
#[derive(Clone, Debug, Default)]
pub struct HeaderList(Vec<HeaderEntry>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a header entry.
    ///
    /// # Panics
    /// Panics if the header key or value is empty or contains only whitespace.
    pub fn push(&mut self, entry: HeaderEntry) {
        assert!(
            entry.is_valid(),
            "Invalid header: key and value must be non-empty (got key={:?}, value={:?})",
            entry.key,
            entry.value
        );
        self.0.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }

    pub fn is_valid(&self) -> bool {
        !(self.key.trim().is_empty() || self.value.trim().is_empty())
    }
}

pub(crate) fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    [REQUEST_ID_HEADER, LOG_ID_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Builds an [`APIError`] from a non-success response. The body is always kept verbatim.
pub(crate) fn parse_api_error_parts(status: StatusCode, headers: &HeaderMap, body: String) -> Error {
    let request_id = request_id_from_headers(headers);
    let status_text = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();

    let mut err = APIError {
        status: status.as_u16(),
        code: None,
        message: status_text,
        request_id,
        raw_body: None,
    };
    if body.is_empty() {
        return err.into();
    }

    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        // `{"error": {"code": .., "message": ..}}` or the API's own `{"code": .., "msg": ..}`.
        let obj = value.get("error").filter(|v| v.is_object()).unwrap_or(&value);
        err.code = obj.get("code").and_then(code_to_string);
        if let Some(message) = obj
            .get("msg")
            .or_else(|| obj.get("message"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            err.message = message.to_string();
        }
        if let Some(id) = value
            .get("request_id")
            .or_else(|| value.get("log_id"))
            .and_then(|v| v.as_str())
        {
            err.request_id = Some(id.to_string());
        }
    } else if !body.trim().is_empty() {
        err.message = body.trim().to_string();
    }

    err.raw_body = Some(body);
    err.into()
}

fn code_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
