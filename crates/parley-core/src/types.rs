use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discrete step of the translation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decoding,
    Transcribing,
    Translating,
    Synthesizing,
    Encoding,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Decoding,
        Stage::Transcribing,
        Stage::Translating,
        Stage::Synthesizing,
        Stage::Encoding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decoding => "decoding",
            Self::Transcribing => "transcribing",
            Self::Translating => "translating",
            Self::Synthesizing => "synthesizing",
            Self::Encoding => "encoding",
        }
    }

    /// The remote service this stage calls, if any.
    pub fn service(self) -> Option<ServiceKind> {
        match self {
            Self::Transcribing => Some(ServiceKind::Stt),
            Self::Translating => Some(ServiceKind::Translation),
            Self::Synthesizing => Some(ServiceKind::Tts),
            Self::Decoding | Self::Encoding => None,
        }
    }

    /// Generic failure text shown to the end user for this stage.
    ///
    /// Retry exhaustion and an open circuit render identically.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::Decoding => "Audio decoding failed",
            Self::Transcribing => "Speech recognition failed",
            Self::Translating => "Translation failed",
            Self::Synthesizing => "Speech synthesis failed",
            Self::Encoding => "Audio encoding failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External service kinds. Each gets its own circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Stt,
    Translation,
    Tts,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Stt, ServiceKind::Translation, ServiceKind::Tts];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Translation => "translation",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a connection wants its requests processed and reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Sequential stages, a single final `translation` event.
    #[default]
    Simple,
    /// Sequential stages with progress events after each stage.
    Streaming,
    /// Streaming events, translation and original-language TTS overlapped.
    Parallel,
}

impl PipelineMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Streaming => "streaming",
            Self::Parallel => "parallel",
        }
    }

    /// Whether intermediate progress events are forwarded to the client.
    pub fn emits_progress(self) -> bool {
        !matches!(self, Self::Simple)
    }
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "streaming" | "stream" => Ok(Self::Streaming),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown pipeline mode: {other}")),
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by a voice request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceInput {
    /// Text typed by the user; skips speech recognition.
    Text(String),
    /// Base64-encoded recorded audio, still undecoded.
    Audio(String),
}

impl VoiceInput {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

/// A single translation request. Immutable once built.
#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub request_id: String,
    pub input: VoiceInput,
    pub source_lang: String,
    pub target_lang: String,
    pub sender_id: String,
    pub received_at: DateTime<Utc>,
}

impl VoiceRequest {
    pub fn new(
        input: VoiceInput,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            input,
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            sender_id: sender_id.into(),
            received_at: Utc::now(),
        }
    }
}

/// Synthesized speech returned by a TTS service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl SynthesizedAudio {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
