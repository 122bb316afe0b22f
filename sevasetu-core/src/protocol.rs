//! Wire messages exchanged with the remote agent: one JSON object per text frame,
//! discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::SessionId;
use crate::ui::UiPayload;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

//=========================================================================================
// Client -> agent
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Hello {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        language: String,
    },
    Audio {
        /// Base64 of the encoded recording.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Hello { .. } => "hello",
            OutboundMessage::Audio { .. } => "audio",
        }
    }
}

//=========================================================================================
// Agent -> client
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    HelloAck {
        #[serde(default, rename = "sessionId")]
        session_id: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    SttResult {
        #[serde(default)]
        text: String,
        #[serde(default)]
        confidence: f64,
    },
    AgentEvent {
        event: AgentEventName,
        #[serde(default)]
        payload: Option<Value>,
    },
    ToolCall {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        payload: Option<Value>,
    },
    ToolResult {
        #[serde(default)]
        tool: String,
        #[serde(default)]
        payload: Option<Value>,
    },
    AssistantMessage(AssistantReply),
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Valid JSON that is not one of the shapes above; kept verbatim for passthrough.
    #[serde(skip_deserializing)]
    Unknown { kind: Option<String>, raw: Value },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ui: Option<UiPayload>,
    #[serde(default, rename = "ttsAudioB64")]
    pub tts_audio_b64: Option<String>,
    #[serde(default, rename = "ttsMime")]
    pub tts_mime: Option<String>,
}

impl AssistantReply {
    pub fn tts_clip(&self) -> Option<TtsClip> {
        let audio_b64 = self.tts_audio_b64.as_deref().filter(|s| !s.is_empty())?;
        Some(TtsClip {
            mime_type: self
                .tts_mime
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| TtsClip::DEFAULT_MIME.to_string()),
            audio_b64: audio_b64.to_string(),
        })
    }
}

/// Synthesized speech attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsClip {
    pub mime_type: String,
    pub audio_b64: String,
}

impl TtsClip {
    pub const DEFAULT_MIME: &'static str = "audio/wav";
}

impl InboundMessage {
    /// Parses one text frame. Only non-JSON text is an error; JSON that does not
    /// match a known variant becomes [`InboundMessage::Unknown`].
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: Value = serde_json::from_str(text)?;
        match serde_json::from_value::<InboundMessage>(raw.clone()) {
            Ok(msg) => Ok(msg),
            Err(_) => Ok(InboundMessage::Unknown {
                kind: discriminator(&raw).map(str::to_string),
                raw,
            }),
        }
    }

    /// The wire discriminator, used for diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::HelloAck { .. } => "hello_ack",
            InboundMessage::SttResult { .. } => "stt_result",
            InboundMessage::AgentEvent { .. } => "agent_event",
            InboundMessage::ToolCall { .. } => "tool_call",
            InboundMessage::ToolResult { .. } => "tool_result",
            InboundMessage::AssistantMessage(_) => "assistant_message",
            InboundMessage::Error { .. } => "error",
            InboundMessage::Unknown { kind, .. } => kind.as_deref().unwrap_or("unknown"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, InboundMessage::Error { .. })
    }
}

fn discriminator(raw: &Value) -> Option<&str> {
    raw.get("type")
        .or_else(|| raw.get("event"))
        .and_then(|v| v.as_str())
}

//=========================================================================================
// Agent events
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum AgentEventName {
    AudioReceived,
    SttStart,
    SttRejected,
    AgentStart,
    Plan,
    TtsStart,
    Error,
    Other(String),
}

impl AgentEventName {
    pub fn as_str(&self) -> &str {
        match self {
            AgentEventName::AudioReceived => "AUDIO_RECEIVED",
            AgentEventName::SttStart => "STT_START",
            AgentEventName::SttRejected => "STT_REJECTED",
            AgentEventName::AgentStart => "AGENT_START",
            AgentEventName::Plan => "PLAN",
            AgentEventName::TtsStart => "TTS_START",
            AgentEventName::Error => "ERROR",
            AgentEventName::Other(s) => s,
        }
    }
}

impl From<String> for AgentEventName {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AUDIO_RECEIVED" => AgentEventName::AudioReceived,
            "STT_START" => AgentEventName::SttStart,
            "STT_REJECTED" => AgentEventName::SttRejected,
            "AGENT_START" => AgentEventName::AgentStart,
            "PLAN" => AgentEventName::Plan,
            "TTS_START" => AgentEventName::TtsStart,
            "ERROR" => AgentEventName::Error,
            _ => AgentEventName::Other(value),
        }
    }
}

/// Typed view of an `agent_event` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEventPayload {
    None,
    Plan(Plan),
    Error { message: String },
    Rejected { reason: String },
    Opaque(Value),
}

impl AgentEventPayload {
    pub fn interpret(event: &AgentEventName, payload: Option<&Value>) -> Self {
        let Some(raw) = payload.filter(|v| !v.is_null()) else {
            return AgentEventPayload::None;
        };

        let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(str::to_string);

        match event {
            AgentEventName::Plan => serde_json::from_value::<Plan>(raw.clone())
                .map(AgentEventPayload::Plan)
                .unwrap_or_else(|_| AgentEventPayload::Opaque(raw.clone())),
            AgentEventName::Error => match field("message") {
                Some(message) => AgentEventPayload::Error { message },
                None => AgentEventPayload::Opaque(raw.clone()),
            },
            AgentEventName::SttRejected => match field("reason") {
                Some(reason) => AgentEventPayload::Rejected { reason },
                None => AgentEventPayload::Opaque(raw.clone()),
            },
            _ => AgentEventPayload::Opaque(raw.clone()),
        }
    }
}

/// The planner's decision for a turn, as streamed in a `PLAN` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_mr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions_mr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
