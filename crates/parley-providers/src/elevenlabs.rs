//! ElevenLabs speech-to-text (Scribe) and text-to-speech.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use parley_core::types::SynthesizedAudio;

use crate::error::{ServiceError, check_status};
use crate::{SpeechToText, TextToSpeech, Transcript};

pub(crate) const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_STT_MODEL: &str = "scribe_v1";
const DEFAULT_TTS_MODEL: &str = "eleven_multilingual_v2";

/// Public premade voice used when nothing better is known.
pub const FALLBACK_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

fn base_url(base_url: Option<&str>) -> String {
    base_url
        .unwrap_or(ELEVENLABS_BASE_URL)
        .trim_end_matches('/')
        .to_string()
}

// --- Speech-to-text ---

pub struct ElevenLabsStt {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl ElevenLabsStt {
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        model: Option<&str>,
        base_url_override: Option<&str>,
    ) -> Self {
        Self {
            base_url: base_url(base_url_override),
            api_key,
            model: model.unwrap_or(DEFAULT_STT_MODEL).to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScribeResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "language_code")]
    language: Option<String>,
    #[serde(default, alias = "language_probability")]
    confidence: Option<f64>,
}

impl ScribeResponse {
    /// The response shape varies; take the first non-empty text field.
    fn into_transcript(self) -> Transcript {
        let text = [self.text, self.transcript, self.content]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty())
            .unwrap_or_default();
        Transcript {
            text: text.trim().to_string(),
            language: self.language,
            confidence: self.confidence,
        }
    }
}

/// Scribe expects a two-letter language code.
fn scribe_language(source_lang: &str) -> String {
    source_lang.chars().take(2).collect::<String>().to_lowercase()
}

#[async_trait]
impl SpeechToText for ElevenLabsStt {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn transcribe(&self, audio: &[u8], source_lang: &str) -> Result<Transcript, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::not_configured(self.id(), "no API key"))?;

        let language = scribe_language(source_lang);
        debug!(model = %self.model, language, audio_bytes = audio.len(), "Sending audio to Scribe");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let form = reqwest::multipart::Form::new()
            .text("model_id", self.model.clone())
            .text("language_code", language)
            .part("file", part);

        let resp = self
            .client
            .post(format!("{}/speech-to-text", self.base_url))
            .header("xi-api-key", api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let resp = check_status(self.id(), resp).await?;

        let body: ScribeResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::invalid_response(self.id(), e.to_string()))?;
        Ok(body.into_transcript())
    }
}

// --- Text-to-speech ---

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<Voice>,
}

/// Voice names that read well in each language with the multilingual model.
fn preferred_voices(lang: &str) -> &'static [&'static str] {
    match lang {
        "es" => &["Matilda", "Isabella", "Diego", "Valentina"],
        "fr" => &["Charlotte", "Alice", "Antoine", "Camille"],
        "de" => &["Hans", "Giselle", "Klaus", "Ingrid"],
        "it" => &["Giorgio", "Bianca", "Marco", "Giulia"],
        "pt" => &["Camila", "Ricardo", "Fernanda"],
        "ar" => &["Khalil", "Amara"],
        "hi" => &["Aditi", "Ravi"],
        "ja" => &["Takeshi", "Akiko"],
        "ko" => &["Jin", "Soo-jin"],
        "zh" => &["Wei", "Li"],
        _ => &["Rachel", "Bella", "Antoni", "Elli", "Josh", "Arnold", "Adam", "Sam"],
    }
}

/// Pick a voice ID for `lang`.
///
/// Order: exact ID hint, name hint, per-language preference, first listed
/// voice, then [`FALLBACK_VOICE_ID`].
pub fn select_voice(voices: &[Voice], lang: &str, hint: Option<&str>) -> String {
    if let Some(hint) = hint {
        if let Some(v) = voices.iter().find(|v| v.voice_id == hint) {
            return v.voice_id.clone();
        }
        let needle = hint.to_lowercase();
        if let Some(v) = voices.iter().find(|v| v.name.to_lowercase().contains(&needle)) {
            return v.voice_id.clone();
        }
        if voices.is_empty() {
            return hint.to_string();
        }
    }

    let lang_code = lang.split('-').next().unwrap_or(lang).to_lowercase();
    for preferred in preferred_voices(&lang_code) {
        let preferred = preferred.to_lowercase();
        if let Some(v) = voices.iter().find(|v| v.name.to_lowercase().contains(&preferred)) {
            return v.voice_id.clone();
        }
    }

    voices
        .first()
        .map(|v| v.voice_id.clone())
        .unwrap_or_else(|| FALLBACK_VOICE_ID.to_string())
}

pub struct ElevenLabsTts {
    base_url: String,
    api_key: Option<String>,
    model: String,
    output_format: Option<String>,
    voice_hint: Option<String>,
    voices: OnceCell<Vec<Voice>>,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        config: &parley_core::config::TtsConfig,
    ) -> Self {
        Self {
            base_url: base_url(config.base_url.as_deref()),
            api_key,
            model: config
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.into()),
            output_format: config.output_format.clone(),
            voice_hint: config.default_voice.clone(),
            voices: OnceCell::new(),
            client,
        }
    }

    /// Cached voice list. A failed load is cached as empty.
    pub async fn voices(&self) -> &[Voice] {
        self.voices
            .get_or_init(|| async {
                match self.fetch_voices().await {
                    Ok(voices) => {
                        info!(count = voices.len(), "Loaded ElevenLabs voices");
                        voices
                    }
                    Err(e) => {
                        warn!(%e, "Failed to load ElevenLabs voices, using fallback voice");
                        Vec::new()
                    }
                }
            })
            .await
    }

    async fn fetch_voices(&self) -> Result<Vec<Voice>, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::not_configured(self.id(), "no API key"))?;
        let resp = self
            .client
            .get(format!("{}/voices", self.base_url))
            .header("xi-api-key", api_key)
            .send()
            .await
            .map_err(|e| ServiceError::request(self.id(), e))?;
        let resp = check_status(self.id(), resp).await?;
        let body: VoicesResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::invalid_response(self.id(), e.to_string()))?;
        Ok(body.voices)
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<SynthesizedAudio, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::not_configured(self.id(), "no API key"))?;

        let voice_id = select_voice(self.voices().await, lang, self.voice_hint.as_deref());
        debug!(voice_id, model = %self.model, text_len = text.len(), "Synthesizing speech");

        let mut request = self
            .client
            .post(format!("{}/text-to-speech/{voice_id}", self.base_url))
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": self.model,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75,
                    "style": 0.0,
                    "use_speaker_boost": true,
                },
            }));
        if let Some(format) = &self.output_format {
            request = request.query(&[("output_format", format)]);
        }

        let resp = request
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
