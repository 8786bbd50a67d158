//! Live service tests: real API calls.
//!
//! Each test is skipped when its API key env var is not set.
//! Run with: `cargo test -p parley-providers --test live`

use parley_core::config::TtsConfig;
use parley_providers::elevenlabs::ElevenLabsTts;
use parley_providers::libretranslate::LibreTranslate;
use parley_providers::openai::OpenAiTts;
use parley_providers::{TextToSpeech, Translator};

fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.is_empty())
}

#[tokio::test]
async fn test_libretranslate_hello() {
    let Some(url) = env_key("PARLEY_LIBRETRANSLATE_URL") else {
        eprintln!("Skipping: PARLEY_LIBRETRANSLATE_URL not set");
        return;
    };
    let translator = LibreTranslate::new(reqwest::Client::new(), Some(&url), env_key("LIBRETRANSLATE_API_KEY"));
    let text = translator.translate("Hello", "en", "es").await.unwrap();
    assert!(!text.is_empty());
    assert!(text.to_lowercase().contains("hola"), "Expected 'hola', got: {text}");
}

#[tokio::test]
async fn test_elevenlabs_synthesize() {
    let Some(api_key) = env_key("ELEVENLABS_API_KEY") else {
        eprintln!("Skipping: ELEVENLABS_API_KEY not set");
        return;
    };
    let tts = ElevenLabsTts::new(reqwest::Client::new(), Some(api_key), &TtsConfig::default());
    let audio = tts.synthesize("Hola", "es").await.unwrap();
    assert!(!audio.is_empty());
    assert_eq!(audio.content_type, "audio/mpeg");
}

#[tokio::test]
async fn test_openai_synthesize() {
    let Some(api_key) = env_key("OPENAI_API_KEY") else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };
    let tts = OpenAiTts::new(reqwest::Client::new(), Some(api_key), &TtsConfig::default());
    let audio = tts.synthesize("Hello", "en").await.unwrap();
    assert!(!audio.is_empty());
}
