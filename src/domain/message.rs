//! Client Message Envelopes
//!
//! Every payload arriving on a client connection is parsed into the
//! `ClientMessage` tagged union before any handler sees it. Deserialization
//! fails closed: an unrecognized `type`, a missing required field, a field of
//! the wrong type, or an unknown field is a structural error and the message
//! never reaches a handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The set of recognized message types, used to distinguish "unknown type"
/// from "known type with an invalid payload" when routing.
pub const KNOWN_MESSAGE_TYPES: &[&str] = &[
    "connection",
    "chat_message",
    "audio_data",
    "transcription",
    "chat_response",
    "text_reading",
    "ping",
    "pong",
    "error",
    "status",
    "performance",
];

/// Typed client message, discriminated by the `type` field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Connection(ConnectionPayload),
    ChatMessage(ChatMessagePayload),
    AudioData(AudioDataPayload),
    Transcription(TranscriptionPayload),
    ChatResponse(ChatResponsePayload),
    TextReading(TextReadingPayload),
    Ping(PingPayload),
    Pong(PongPayload),
    Error(ErrorPayload),
    Status(StatusPayload),
    Performance(PerformancePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConnectionPayload {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChatMessagePayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AudioDataPayload {
    /// Base64-encoded audio
    pub audio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TranscriptionPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChatResponsePayload {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TextReadingPayload {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PingPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PongPayload {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StatusPayload {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PerformancePayload {
    pub metrics: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl ClientMessage {
    /// The wire name of this message's type discriminator
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Connection(_) => "connection",
            ClientMessage::ChatMessage(_) => "chat_message",
            ClientMessage::AudioData(_) => "audio_data",
            ClientMessage::Transcription(_) => "transcription",
            ClientMessage::ChatResponse(_) => "chat_response",
            ClientMessage::TextReading(_) => "text_reading",
            ClientMessage::Ping(_) => "ping",
            ClientMessage::Pong(_) => "pong",
            ClientMessage::Error(_) => "error",
            ClientMessage::Status(_) => "status",
            ClientMessage::Performance(_) => "performance",
        }
    }
}

/// A parsed inbound message together with its routing metadata
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub client_id: String,
    pub message_type: String,
    pub payload: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Raw source string as received on the wire
    pub raw: String,
}

impl MessageEnvelope {
    pub fn new(
        client_id: &str,
        message_type: &str,
        payload: HashMap<String, Value>,
        raw: &str,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            message_type: message_type.to_string(),
            payload,
            timestamp: Utc::now(),
            raw: raw.to_string(),
        }
    }
}
