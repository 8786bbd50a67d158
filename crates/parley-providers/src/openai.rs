//! OpenAI-compatible audio APIs.
//!
//! Whisper transcription works against both OpenAI and Groq; speech
//! synthesis uses OpenAI's `/v1/audio/speech`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use parley_core::types::SynthesizedAudio;

use crate::error::{ServiceError, check_status};
use crate::{SpeechToText, TextToSpeech, Transcript};

pub(crate) const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct WhisperStt {
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl WhisperStt {
    pub fn openai(
        client: reqwest::Client,
        api_key: Option<String>,
        model: Option<&str>,
        base_url: Option<&str>,
    ) -> Self {
        Self {
            provider_id: "openai".into(),
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or("whisper-1").to_string(),
            client,
        }
    }

    pub fn groq(
        client: reqwest::Client,
        api_key: Option<String>,
        model: Option<&str>,
        base_url: Option<&str>,
    ) -> Self {
        Self {
            provider_id: "groq".into(),
            base_url: base_url
                .unwrap_or(GROQ_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or("whisper-large-v3-turbo").to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[async_trait]
impl SpeechToText for WhisperStt {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn transcribe(&self, audio: &[u8], source_lang: &str) -> Result<Transcript, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::not_configured(self.id(), "no API key"))?;

        debug!(provider = self.id(), model = %self.model, audio_bytes = audio.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", source_lang.chars().take(2).collect::<String>())
            .text("response_format", "json")
            .part("file", part);

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let resp = check_status(self.id(), resp).await?;

        let body: WhisperResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::invalid_response(self.id(), e.to_string()))?;
        Ok(Transcript {
            text: body.text.trim().to_string(),
            language: body.language,
            confidence: None,
        })
    }
}

pub struct OpenAiTts {
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        config: &parley_core::config::TtsConfig,
    ) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.default_model.clone().unwrap_or_else(|| "tts-1".into()),
            voice: config.default_voice.clone().unwrap_or_else(|| "alloy".into()),
            client,
        }
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    fn id(&self) -> &str {
        "openai"
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<SynthesizedAudio, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::not_configured(self.id(), "no API key"))?;

        debug!(voice = %self.voice, lang, text_len = text.len(), "Synthesizing speech");

        let resp = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "response_format": "mp3",
            }))
            .send()
            .await
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let resp = check_status(self.id(), resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ServiceError::request(self.id(), e))?;

        Ok(SynthesizedAudio::new(bytes.to_vec(), "audio/mpeg"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_urls() {
        let client = reqwest::Client::new();
        let groq = WhisperStt::groq(client.clone(), None, None, None);
        assert!(groq.base_url.contains("groq.com"));
        assert_eq!(groq.id(), "groq");

        let openai = WhisperStt::openai(client, None, None, Some("http://localhost:9000/v1/"));
        assert_eq!(openai.base_url, "http://localhost:9000/v1");
        assert_eq!(openai.model, "whisper-1");
    }

    #[test]
    fn test_tts_defaults() {
        let tts = OpenAiTts::new(
            reqwest::Client::new(),
            None,
            &parley_core::config::TtsConfig::default(),
        );
        assert_eq!(tts.model, "tts-1");
        assert_eq!(tts.voice, "alloy");
    }

    #[tokio::test]
    async fn test_tts_without_key() {
        let tts = OpenAiTts::new(
            reqwest::Client::new(),
            None,
            &parley_core::config::TtsConfig::default(),
        );
        let err = tts.synthesize("hello", "en").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
