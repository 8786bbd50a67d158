//! In-memory service stubs for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use parley_core::types::SynthesizedAudio;
use parley_providers::{ServiceError, Services, SpeechToText, TextToSpeech, Transcript, Translator};

/// Returns a fixed transcript, or fails every call.
pub struct StubStt {
    text: Option<String>,
    calls: AtomicUsize,
}

impl StubStt {
    pub fn returning(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for StubStt {
    fn id(&self) -> &str {
        "stub-stt"
    }

    async fn transcribe(&self, _audio: &[u8], _source_lang: &str) -> Result<Transcript, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.text {
            Some(text) => Ok(Transcript::new(text.clone())),
            None => Err(ServiceError::invalid_response("stub-stt", "unavailable")),
        }
    }
}

/// Knows "Hello" -> "Hola"; anything else is tagged with the target language.
pub struct StubTranslator {
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl StubTranslator {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for StubTranslator {
    fn id(&self) -> &str {
        "stub-translator"
    }

    async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ServiceError::Http {
                service: "stub-translator".into(),
                status: 503,
                body: "overloaded".into(),
            });
        }
        Ok(match text {
            "Hello" => "Hola".to_string(),
            other => format!("[{target}] {other}"),
        })
    }
}

/// Produces `audio:<lang>:<text>` as MP3 bytes, or nothing at all.
pub struct StubTts {
    empty: bool,
    fail_lang: Option<String>,
    calls: AtomicUsize,
}

impl StubTts {
    pub fn new() -> Self {
        Self {
            empty: false,
            fail_lang: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn silent() -> Self {
        Self {
            empty: true,
            ..Self::new()
        }
    }

    /// Fails only when asked to speak `lang`.
    pub fn failing_for(lang: impl Into<String>) -> Self {
        Self {
            fail_lang: Some(lang.into()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for StubTts {
    fn id(&self) -> &str {
        "stub-tts"
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<SynthesizedAudio, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lang.as_deref() == Some(lang) {
            return Err(ServiceError::invalid_response("stub-tts", "voice unavailable"));
        }
        let bytes = if self.empty {
            Vec::new()
        } else {
            format!("audio:{lang}:{text}").into_bytes()
        };
        Ok(SynthesizedAudio::new(bytes, "audio/mpeg"))
    }
}

/// A set of stubs plus handles to inspect their call counts.
#[derive(Clone)]
pub struct Stubs {
    pub stt: Arc<StubStt>,
    pub translator: Arc<StubTranslator>,
    pub tts: Arc<StubTts>,
}

impl Stubs {
    pub fn new(stt: StubStt, translator: StubTranslator, tts: StubTts) -> Self {
        Self {
            stt: Arc::new(stt),
            translator: Arc::new(translator),
            tts: Arc::new(tts),
        }
    }

    /// Transcribes to "Hello", translates to "Hola".
    pub fn hello() -> Self {
        Self::new(StubStt::returning("Hello"), StubTranslator::new(), StubTts::new())
    }

    pub fn services(&self) -> Services {
        Services::new(self.stt.clone(), self.translator.clone(), self.tts.clone())
    }
}
