//! Typed workflow stream events.
//!
//! Each server-sent frame decodes into exactly one [`WorkflowEvent`]. The shape of
//! its payload is chosen by the frame's `event:` tag:
//! - `Message` -> [`MessageEventData`]
//! - `Interrupt` -> [`InterruptEventData`]
//! - `Error` -> [`ErrorEventData`]
//! - anything else -> the raw `data:` text

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Event type tag carried by the `event:` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WorkflowEventKind {
    Message,
    Interrupt,
    Error,
    /// Absent or unrecognized tag.
    #[default]
    Unknown,
}

impl WorkflowEventKind {
    /// Exact, case-sensitive match against the names the server emits.
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "Message" => WorkflowEventKind::Message,
            "Interrupt" => WorkflowEventKind::Interrupt,
            "Error" => WorkflowEventKind::Error,
            _ => WorkflowEventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEventKind::Message => "Message",
            WorkflowEventKind::Interrupt => "Interrupt",
            WorkflowEventKind::Error => "Error",
            WorkflowEventKind::Unknown => "Unknown",
        }
    }

    /// Decode a `data:` payload into the shape this kind dictates.
    pub(crate) fn decode_data(self, raw: &str) -> Result<WorkflowEventData> {
        fn json<T: for<'de> Deserialize<'de>>(kind: WorkflowEventKind, raw: &str) -> Result<T> {
            serde_json::from_str(raw).map_err(|err| {
                Error::decode(
                    format!("failed to parse {} event data: {err}", kind.as_str()),
                    raw,
                )
            })
        }

        Ok(match self {
            WorkflowEventKind::Message => WorkflowEventData::Message(json(self, raw)?),
            WorkflowEventKind::Interrupt => WorkflowEventData::Interrupt(json(self, raw)?),
            WorkflowEventKind::Error => WorkflowEventData::Error(json(self, raw)?),
            WorkflowEventKind::Unknown => WorkflowEventData::Raw(raw.to_string()),
        })
    }
}

impl fmt::Display for WorkflowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a decoded frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WorkflowEventData {
    Message(MessageEventData),
    Interrupt(InterruptEventData),
    Error(ErrorEventData),
    /// Trimmed `data:` text of an event with an unknown tag.
    Raw(String),
    /// The frame carried no `data:` line.
    #[default]
    None,
}

/// One event decoded from the workflow stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowEvent {
    /// Frame id; monotonic within one stream. `0` when absent or non-numeric.
    pub id: i64,
    pub kind: WorkflowEventKind,
    pub data: WorkflowEventData,
}

impl WorkflowEvent {
    pub fn message(&self) -> Option<&MessageEventData> {
        match &self.data {
            WorkflowEventData::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn interrupt(&self) -> Option<&InterruptEventData> {
        match &self.data {
            WorkflowEventData::Interrupt(i) => Some(i),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorEventData> {
        match &self.data {
            WorkflowEventData::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&str> {
        match &self.data {
            WorkflowEventData::Raw(s) => Some(s),
            _ => None,
        }
    }
}

/// Output emitted by a workflow node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEventData {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub node_title: String,
    #[serde(default)]
    pub node_seq_id: String,
    #[serde(default)]
    pub node_is_finish: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<HashMap<String, String>>,
    #[serde(default)]
    pub cost: String,
}

/// Identifies the interrupted run so it can be resumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterruptData {
    #[serde(default)]
    pub event_id: String,
    #[serde(default, rename = "type")]
    pub interrupt_type: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterruptEventData {
    #[serde(default)]
    pub interrupt_data: InterruptData,
    #[serde(default)]
    pub node_title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEventData {
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: String,
}
