//! Credential checks against each configured provider.
//!
//! Key-based providers are probed with a cheap listing call (voices or
//! models); LibreTranslate is probed with a one-word translation.

use serde::Deserialize;
use tracing::debug;

use parley_core::config::Config;
use parley_core::types::ServiceKind;

use crate::Translator;
use crate::elevenlabs::ELEVENLABS_BASE_URL;
use crate::error::{ServiceError, check_status};
use crate::libretranslate::LibreTranslate;
use crate::openai::{GROQ_BASE_URL, OPENAI_BASE_URL};

/// Outcome of probing one provider.
#[derive(Debug)]
pub struct ProbeReport {
    pub service: ServiceKind,
    pub provider: String,
    pub outcome: Result<String, ServiceError>,
}

impl ProbeReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default, alias = "voices")]
    data: Vec<serde_json::Value>,
}

/// Probe every provider named in `config`, STT chain first.
pub async fn probe_all(client: &reqwest::Client, config: &Config) -> Vec<ProbeReport> {
    let mut reports = Vec::new();

    for entry in config.stt().chain() {
        let outcome = probe_key(
            client,
            &entry.provider,
            entry.resolve_api_key(),
            entry.base_url.as_deref(),
        )
        .await;
        reports.push(ProbeReport {
            service: ServiceKind::Stt,
            provider: entry.provider,
            outcome,
        });
    }

    let translation = config.translation();
    let translator = LibreTranslate::new(
        client.clone(),
        translation.url.as_deref(),
        translation.resolve_api_key(),
    );
    let outcome = translator
        .translate("hello", "en", "es")
        .await
        .map(|text| format!("\"hello\" -> \"{text}\""));
    reports.push(ProbeReport {
        service: ServiceKind::Translation,
        provider: translation.provider,
        outcome,
    });

    let tts = config.tts();
    let outcome = probe_key(client, &tts.provider, tts.resolve_api_key(), tts.base_url.as_deref()).await;
    reports.push(ProbeReport {
        service: ServiceKind::Tts,
        provider: tts.provider,
        outcome,
    });

    reports
}

/// List voices (ElevenLabs) or models (OpenAI-compatible) with `key`.
pub async fn probe_key(
    client: &reqwest::Client,
    provider: &str,
    key: Option<String>,
    base_url: Option<&str>,
) -> Result<String, ServiceError> {
    let key = key.ok_or_else(|| ServiceError::not_configured(provider, "no API key configured"))?;

    let (request, noun) = match provider {
        "elevenlabs" => {
            let base = base_url.unwrap_or(ELEVENLABS_BASE_URL);
            (client.get(format!("{base}/voices")).header("xi-api-key", &key), "voices")
        }
        "openai" | "groq" => {
            let default = if provider == "groq" { GROQ_BASE_URL } else { OPENAI_BASE_URL };
            let base = base_url.unwrap_or(default);
            (client.get(format!("{base}/models")).bearer_auth(&key), "models")
        }
        other => return Err(ServiceError::not_configured(other, "unknown provider")),
    };

    debug!(provider, "Probing credentials");
    let resp = request
        .send()
        .await
        .map_err(|e| ServiceError::request(provider, e))?;
    let resp = check_status(provider, resp).await?;
    let listing: Listing = resp
        .json()
        .await
        .map_err(|e| ServiceError::invalid_response(provider, e.to_string()))?;

    Ok(format!("{} {noun} available", listing.data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = reqwest::Client::new();
        let err = probe_key(&client, "elevenlabs", None, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let client = reqwest::Client::new();
        let err = probe_key(&client, "acme", Some("k".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured { .. }));
    }

    #[test]
    fn test_listing_accepts_voices_or_data() {
        let voices: Listing = serde_json::from_str(r#"{"voices":[{"voice_id":"a"},{"voice_id":"b"}]}"#).unwrap();
        assert_eq!(voices.data.len(), 2);
        let models: Listing = serde_json::from_str(r#"{"object":"list","data":[{"id":"whisper-1"}]}"#).unwrap();
        assert_eq!(models.data.len(), 1);
    }
}
