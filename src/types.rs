use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Error, Result};

/// Body of the run and stream-run endpoints.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowRequest<P = Value> {
    pub workflow_id: String,
    pub app_id: String,
    pub parameters: P,
}

/// Body of the stream-resume endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeRequest {
    pub event_id: String,
    pub workflow_id: String,
    pub resume_data: String,
    pub interrupt_type: i32,
}

/// Envelope exactly as it appears on the wire; `data` is still encoded.
#[derive(Debug, Deserialize)]
struct RawRunEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    cost: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    debug_url: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    token: i64,
}

/// Response of the one-shot run endpoint.
///
/// The API double-encodes the workflow output: `data` is a JSON document
/// serialized into a string. [`RunResponse::from_slice`] decodes both layers
/// up front, so `data` is `None` only when the server sent no output.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResponse<T = Value> {
    pub code: i64,
    pub cost: String,
    /// Inner payload as received (JSON text).
    pub raw_data: Option<String>,
    /// `raw_data` decoded into the caller's type.
    pub data: Option<T>,
    pub debug_url: String,
    pub msg: String,
    pub token: i64,
    /// Request identifier returned by the server (if any).
    pub request_id: Option<String>,
}

impl<T: DeserializeOwned> RunResponse<T> {
    /// Decode the outer envelope, then its embedded payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let envelope: RawRunEnvelope = serde_json::from_slice(bytes).map_err(|err| {
            Error::decode(
                format!("failed to parse run response: {err}"),
                &String::from_utf8_lossy(bytes),
            )
        })?;

        let raw_data = match envelope.data {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s),
            // Tolerate servers that send the payload un-encoded.
            Some(other) => Some(other.to_string()),
        };
        let data = raw_data
            .as_deref()
            .map(|raw| {
                serde_json::from_str::<T>(raw).map_err(|err| {
                    Error::decode(format!("failed to parse run response data: {err}"), raw)
                })
            })
            .transpose()?;

        Ok(Self {
            code: envelope.code,
            cost: envelope.cost,
            raw_data,
            data,
            debug_url: envelope.debug_url,
            msg: envelope.msg,
            token: envelope.token,
            request_id: None,
        })
    }
}

impl<T> RunResponse<T> {
    /// Whether the API reported success (`code == 0`).
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}
