//! External speech and translation services.
//!
//! Each backend implements one of [`SpeechToText`], [`Translator`] or
//! [`TextToSpeech`]. Calls are wrapped by the [`resilience`] module, which
//! adds retry with backoff and a circuit breaker per service kind.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_core::config::{Config, SttProviderConfig};
use parley_core::types::SynthesizedAudio;

pub mod elevenlabs;
pub mod error;
pub mod failover;
pub mod libretranslate;
pub mod openai;
pub mod probe;
pub mod resilience;

pub use error::ServiceError;

/// Result of a speech-to-text call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            confidence: None,
        }
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Provider identifier (e.g. "elevenlabs", "groq").
    fn id(&self) -> &str;

    async fn transcribe(&self, audio: &[u8], source_lang: &str) -> Result<Transcript, ServiceError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    fn id(&self) -> &str;

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn id(&self) -> &str;

    async fn synthesize(&self, text: &str, lang: &str) -> Result<SynthesizedAudio, ServiceError>;
}

/// Languages offered to clients for every service.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "ar", "hi", "ja", "ko", "zh", "ru", "nl", "pl", "tr",
];

/// The three services a pipeline needs.
#[derive(Clone)]
pub struct Services {
    pub stt: Arc<dyn SpeechToText>,
    pub translator: Arc<dyn Translator>,
    pub tts: Arc<dyn TextToSpeech>,
}

impl Services {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        translator: Arc<dyn Translator>,
        tts: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self { stt, translator, tts }
    }

    /// Build HTTP clients for the configured providers.
    ///
    /// All clients share one connection pool with the configured request timeout.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let stt_config = config.stt();
        let chain: Vec<Arc<dyn SpeechToText>> = stt_config
            .chain()
            .iter()
            .map(|entry| build_stt(client.clone(), entry))
            .collect::<anyhow::Result<_>>()?;
        let stt: Arc<dyn SpeechToText> = if chain.len() == 1 {
            chain.into_iter().next().ok_or_else(|| anyhow::anyhow!("empty STT chain"))?
        } else {
            Arc::new(failover::FailoverStt::new("stt-failover", chain))
        };

        let translation = config.translation();
        let translator: Arc<dyn Translator> = match translation.provider.as_str() {
            "libretranslate" => Arc::new(libretranslate::LibreTranslate::new(
                client.clone(),
                translation.url.as_deref(),
                translation.resolve_api_key(),
            )),
            other => anyhow::bail!("Unknown translation provider: {other}"),
        };

        let tts_config = config.tts();
        let tts_key = tts_config.resolve_api_key();
        let tts: Arc<dyn TextToSpeech> = match tts_config.provider.as_str() {
            "elevenlabs" => Arc::new(elevenlabs::ElevenLabsTts::new(client, tts_key, &tts_config)),
            "openai" => Arc::new(openai::OpenAiTts::new(client, tts_key, &tts_config)),
            other => anyhow::bail!("Unknown TTS provider: {other}"),
        };

        info!(
            stt = stt.id(),
            translation = translator.id(),
            tts = tts.id(),
            "Services configured"
        );
        Ok(Self::new(stt, translator, tts))
    }
}

fn build_stt(client: reqwest::Client, entry: &SttProviderConfig) -> anyhow::Result<Arc<dyn SpeechToText>> {
    let key = entry.resolve_api_key();
    let model = entry.model.as_deref();
    let base_url = entry.base_url.as_deref();
    let stt: Arc<dyn SpeechToText> = match entry.provider.as_str() {
        "elevenlabs" => Arc::new(elevenlabs::ElevenLabsStt::new(client, key, model, base_url)),
        "openai" => Arc::new(openai::WhisperStt::openai(client, key, model, base_url)),
        "groq" => Arc::new(openai::WhisperStt::groq(client, key, model, base_url)),
        other => anyhow::bail!("Unknown STT provider: {other}"),
    };
    Ok(stt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_from_default_config() {
        let services = Services::from_config(&Config::default()).unwrap();
        assert_eq!(services.stt.id(), "elevenlabs");
        assert_eq!(services.translator.id(), "libretranslate");
        assert_eq!(services.tts.id(), "elevenlabs");
    }

    #[test]
    fn test_services_failover_chain() {
        let config = Config::from_json5(
            r#"{ services: { stt: { provider: "groq", fallbacks: [{ provider: "openai" }] }, tts: { provider: "openai" } } }"#,
        )
        .unwrap();
        let services = Services::from_config(&config).unwrap();
        assert_eq!(services.stt.id(), "stt-failover");
        assert_eq!(services.tts.id(), "openai");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config =
            Config::from_json5(r#"{ services: { stt: { provider: "vosk" } } }"#).unwrap();
        assert!(Services::from_config(&config).is_err());
    }
}
