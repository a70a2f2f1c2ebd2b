// ABOUTME: Canonical event model produced from every transport
// ABOUTME: Typed payloads per event kind with lossless re-serialisation to {type, properties}

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Token counts reported on a finished step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
}

/// One part of an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// `text`, `reasoning`, `tool`, `step-finish` and friends
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool-call state as reported by the agent server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(rename = "modelID", default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    pub fn is_reasoning(&self) -> bool {
        self.kind == "reasoning"
    }

    /// Tool status string when the part is a tool call
    pub fn tool_status(&self) -> Option<&str> {
        match self.state.as_ref()? {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("status").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUpdate {
    pub part: Part,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Either a bare string or an object with a `type` member
    pub status: Value,
}

impl SessionStatus {
    pub fn status_name(&self) -> Option<&str> {
        match &self.status {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("type").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorPayload {
    pub fn describe(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalUrl {
    pub url: String,
}

/// Normalised event delivered to consumers regardless of transport
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    MessagePartUpdated(PartUpdate),
    Status(StatusUpdate),
    SessionStatus(SessionStatus),
    Heartbeat(Map<String, Value>),
    Done(Map<String, Value>),
    Error(ErrorPayload),
    ExternalUrl(ExternalUrl),
}

impl CanonicalEvent {
    pub const MESSAGE_PART_UPDATED: &'static str = "message.part.updated";
    pub const STATUS: &'static str = "status";
    pub const SESSION_STATUS: &'static str = "session.status";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const DONE: &'static str = "done";
    pub const ERROR: &'static str = "error";
    pub const EXTERNAL_URL: &'static str = "external-url";

    /// Wire discriminator of this event
    pub fn kind(&self) -> &'static str {
        match self {
            CanonicalEvent::MessagePartUpdated(_) => Self::MESSAGE_PART_UPDATED,
            CanonicalEvent::Status(_) => Self::STATUS,
            CanonicalEvent::SessionStatus(_) => Self::SESSION_STATUS,
            CanonicalEvent::Heartbeat(_) => Self::HEARTBEAT,
            CanonicalEvent::Done(_) => Self::DONE,
            CanonicalEvent::Error(_) => Self::ERROR,
            CanonicalEvent::ExternalUrl(_) => Self::EXTERNAL_URL,
        }
    }

    /// Decode a payload for a known kind; unknown kinds yield `Ok(None)`
    pub fn from_parts(kind: &str, properties: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match kind {
            Self::MESSAGE_PART_UPDATED => {
                CanonicalEvent::MessagePartUpdated(serde_json::from_value(properties)?)
            }
            Self::STATUS => CanonicalEvent::Status(serde_json::from_value(properties)?),
            Self::SESSION_STATUS => {
                CanonicalEvent::SessionStatus(serde_json::from_value(properties)?)
            }
            Self::HEARTBEAT | "server.heartbeat" => CanonicalEvent::Heartbeat(object(properties)),
            Self::DONE | "session.idle" => CanonicalEvent::Done(object(properties)),
            Self::ERROR | "session.error" => CanonicalEvent::Error(serde_json::from_value(properties)?),
            Self::EXTERNAL_URL => CanonicalEvent::ExternalUrl(serde_json::from_value(properties)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn properties(&self) -> Value {
        let value = match self {
            CanonicalEvent::MessagePartUpdated(p) => serde_json::to_value(p),
            CanonicalEvent::Status(p) => serde_json::to_value(p),
            CanonicalEvent::SessionStatus(p) => serde_json::to_value(p),
            CanonicalEvent::Heartbeat(p) | CanonicalEvent::Done(p) => Ok(Value::Object(p.clone())),
            CanonicalEvent::Error(p) => serde_json::to_value(p),
            CanonicalEvent::ExternalUrl(p) => serde_json::to_value(p),
        };
        // Payload structs only hold JSON-representable data
        value.unwrap_or(Value::Null)
    }

    /// Serialise back to a `{type, properties}` frame
    pub fn to_frame(&self) -> Value {
        json!({
            "type": self.kind(),
            "properties": self.properties(),
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            CanonicalEvent::MessagePartUpdated(p) => p.part.session_id.as_deref(),
            CanonicalEvent::SessionStatus(s) => s.session_id.as_deref(),
            CanonicalEvent::Heartbeat(m) | CanonicalEvent::Done(m) => {
                m.get("sessionID").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Token usage and model carried by this event, if any
    pub fn usage(&self) -> Option<(&TokenUsage, Option<&str>)> {
        match self {
            CanonicalEvent::MessagePartUpdated(p) => p
                .part
                .tokens
                .as_ref()
                .map(|tokens| (tokens, p.part.model_id.as_deref())),
            _ => None,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
