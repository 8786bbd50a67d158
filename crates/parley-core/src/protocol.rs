//! Parley WebSocket wire protocol.
//!
//! Clients send one JSON object per text frame carrying either typed text or
//! base64 audio. The server answers with `{type, data}` events, or
//! `{type: "error", message}` when something goes wrong.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Stage, VoiceInput, VoiceRequest};

/// A raw inbound frame as sent by the browser client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Base64-encoded recorded audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

/// Reasons an inbound frame cannot become a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Malformed(String),

    #[error("Invalid message format: missing field `{0}`")]
    MissingField(&'static str),

    #[error("No text or audio data provided")]
    NoInput,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ProtocolError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ProtocolError::MissingField(field)),
    }
}

impl InboundMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Validate the frame and build an immutable request.
    ///
    /// Audio wins when both `audio_data` and `text` are present.
    pub fn into_request(self) -> Result<VoiceRequest, ProtocolError> {
        let source_lang = required(self.source_lang, "source_lang")?;
        let target_lang = required(self.target_lang, "target_lang")?;
        let sender_id = required(self.sender_id, "sender_id")?;

        let input = match (self.audio_data, self.text) {
            (Some(audio), _) if !audio.is_empty() => VoiceInput::Audio(audio),
            (_, Some(text)) if !text.is_empty() => VoiceInput::Text(text),
            _ => return Err(ProtocolError::NoInput),
        };

        Ok(VoiceRequest::new(input, source_lang, target_lang, sender_id))
    }
}

/// Stage marker carried by progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    pub stage: Stage,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttResultData {
    pub original_text: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResultData {
    pub translated_text: String,
    pub message_id: String,
}

/// Final payload of a successful request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationData {
    pub message_id: String,
    pub original_text: String,
    pub translated_text: String,
    pub audio_url: String,

    /// Original-language audio (parallel mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url_original: Option<String>,

    /// Same as `audio_url`; present alongside `audio_url_original`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url_translated: Option<String>,
}

/// A server -> client event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    ProcessingStarted { data: StageData },
    ProcessingUpdate { data: StageData },
    SttResult { data: SttResultData },
    TranslationResult { data: TranslationResultData },
    /// Final event in simple mode.
    Translation { data: TranslationData },
    /// Final event in streaming and parallel modes.
    TranslationComplete { data: TranslationData },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
    },
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            stage: None,
        }
    }

    pub fn stage_error(stage: Stage, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            stage: Some(stage),
        }
    }

    /// Wire name of the event (`type` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessingStarted { .. } => "processing_started",
            Self::ProcessingUpdate { .. } => "processing_update",
            Self::SttResult { .. } => "stt_result",
            Self::TranslationResult { .. } => "translation_result",
            Self::Translation { .. } => "translation",
            Self::TranslationComplete { .. } => "translation_complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Translation { .. } | Self::TranslationComplete { .. } | Self::Error { .. }
        )
    }
}
