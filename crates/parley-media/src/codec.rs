//! Base64 audio payloads and data URLs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::debug;

use parley_core::protocol::{InboundMessage, ProtocolError};
use parley_core::types::SynthesizedAudio;

use crate::pool::{WorkerError, WorkerPool};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio: {0}")]
    InvalidBase64(String),

    #[error("audio payload is empty")]
    Empty,

    #[error("audio payload too large: {size} bytes (max {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Strip a `data:<mime>;base64,` prefix if present.
fn strip_data_url(payload: &str) -> &str {
    match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => payload,
    }
}

/// Decode a base64 audio payload, rejecting anything over `max_bytes`.
pub fn decode_audio(payload: &str, max_bytes: usize) -> Result<Vec<u8>, DecodeError> {
    let data = strip_data_url(payload.trim());
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let estimated = data.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(3) {
        return Err(DecodeError::TooLarge {
            size: estimated,
            limit: max_bytes,
        });
    }

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Render synthesized audio as a `data:` URL the browser can play directly.
pub fn encode_data_url(audio: &SynthesizedAudio) -> String {
    format!(
        "data:{};base64,{}",
        audio.content_type,
        STANDARD.encode(&audio.bytes)
    )
}

/// Codec operations dispatched onto a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct AudioCodec {
    pool: WorkerPool,
    max_audio_bytes: usize,
}

impl AudioCodec {
    pub fn new(pool: WorkerPool, max_audio_bytes: usize) -> Self {
        Self {
            pool,
            max_audio_bytes,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn max_audio_bytes(&self) -> usize {
        self.max_audio_bytes
    }

    pub async fn decode(&self, payload: String) -> Result<Vec<u8>, DecodeError> {
        let max = self.max_audio_bytes;
        let bytes = self.pool.run(move || decode_audio(&payload, max)).await??;
        debug!(audio_bytes = bytes.len(), "Decoded audio payload");
        Ok(bytes)
    }

    pub async fn encode(&self, audio: SynthesizedAudio) -> Result<String, DecodeError> {
        Ok(self.pool.run(move || encode_data_url(&audio)).await?)
    }

    /// Parse an inbound text frame off the event loop.
    pub async fn parse_inbound(&self, frame: String) -> Result<InboundMessage, DecodeError> {
        Ok(self.pool.run(move || InboundMessage::parse(&frame)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_data_url() {
        let encoded = STANDARD.encode(b"webm-bytes");
        assert_eq!(decode_audio(&encoded, 1024).unwrap(), b"webm-bytes");

        let url = format!("data:audio/webm;base64,{encoded}");
        assert_eq!(decode_audio(&url, 1024).unwrap(), b"webm-bytes");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_audio("not base64!!", 1024),
            Err(DecodeError::InvalidBase64(_))
        ));
        assert!(matches!(decode_audio("   ", 1024), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_size_limit() {
        let encoded = STANDARD.encode(vec![0u8; 100]);
        assert!(decode_audio(&encoded, 100).is_ok());
        assert!(matches!(
            decode_audio(&encoded, 99),
            Err(DecodeError::TooLarge { size: 100, limit: 99 })
        ));

        let big = STANDARD.encode(vec![0u8; 4096]);
        assert!(matches!(
            decode_audio(&big, 1024),
            Err(DecodeError::TooLarge { limit: 1024, .. })
        ));
    }

    #[test]
    fn test_encode_data_url() {
        let audio = SynthesizedAudio::new(b"mp3".to_vec(), "audio/mpeg");
        assert_eq!(encode_data_url(&audio), "data:audio/mpeg;base64,bXAz");
    }

    #[tokio::test]
    async fn test_codec_on_pool() {
        let codec = AudioCodec::new(WorkerPool::new(1), 1024);
        let bytes = codec.decode(STANDARD.encode(b"abc")).await.unwrap();
        assert_eq!(bytes, b"abc");

        let msg = codec
            .parse_inbound(r#"{"text":"hi","source_lang":"en","target_lang":"es","sender_id":"u"}"#.into())
            .await
            .unwrap();
        assert_eq!(msg.text.as_deref(), Some("hi"));

        let err = codec.parse_inbound("{".into()).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid message format"));
    }
}
