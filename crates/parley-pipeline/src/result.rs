//! Pipeline output and the draft it is built from.

use serde::Serialize;

use parley_core::types::{Stage, SynthesizedAudio};

/// Final output of a successful request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub request_id: String,
    pub original_text: String,
    pub translated_text: String,
    pub audio_bytes: Vec<u8>,
    pub content_type: String,
    pub audio_url: String,
    /// Original-language speech, set only in parallel mode.
    pub original_audio_url: Option<String>,
}

/// What is known about a request after some stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Partial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// Accumulates stage outputs in order.
///
/// Each stage writes its field once, after every earlier stage.
#[derive(Debug)]
pub struct PipelineDraft {
    request_id: String,
    last: Option<Stage>,
    original_text: Option<String>,
    translated_text: Option<String>,
    audio: Option<SynthesizedAudio>,
    audio_url: Option<String>,
    original_audio_url: Option<String>,
}

impl PipelineDraft {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            last: None,
            original_text: None,
            translated_text: None,
            audio: None,
            audio_url: None,
            original_audio_url: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The most recently completed stage.
    pub fn last_stage(&self) -> Option<Stage> {
        self.last
    }

    fn advance(&mut self, stage: Stage) {
        debug_assert!(
            self.last.is_none_or(|last| last < stage),
            "stage {stage} recorded after {:?}",
            self.last
        );
        self.last = Some(stage);
    }

    pub fn decoded(&mut self) {
        self.advance(Stage::Decoding);
    }

    pub fn transcribed(&mut self, text: String) {
        self.advance(Stage::Transcribing);
        self.original_text = Some(text);
    }

    pub fn translated(&mut self, text: String) {
        self.advance(Stage::Translating);
        self.translated_text = Some(text);
    }

    pub fn synthesized(&mut self, audio: SynthesizedAudio) {
        self.advance(Stage::Synthesizing);
        self.audio = Some(audio);
    }

    pub fn encoded(&mut self, audio_url: String) {
        self.advance(Stage::Encoding);
        self.audio_url = Some(audio_url);
    }

    /// Outside the main chain; may arrive at any point.
    pub fn set_original_audio_url(&mut self, url: String) {
        self.original_audio_url = Some(url);
    }

    pub fn original_text(&self) -> Option<&str> {
        self.original_text.as_deref()
    }

    pub fn translated_text(&self) -> Option<&str> {
        self.translated_text.as_deref()
    }

    pub fn audio(&self) -> Option<&SynthesizedAudio> {
        self.audio.as_ref()
    }

    pub fn partial(&self) -> Partial {
        Partial {
            original_text: self.original_text.clone(),
            translated_text: self.translated_text.clone(),
            audio_url: self.audio_url.clone(),
        }
    }

    /// Build the result, or name the first stage whose output is missing or empty.
    pub fn finish(self) -> Result<PipelineResult, Stage> {
        let original_text = self
            .original_text
            .filter(|t| !t.trim().is_empty())
            .ok_or(Stage::Transcribing)?;
        let translated_text = self
            .translated_text
            .filter(|t| !t.trim().is_empty())
            .ok_or(Stage::Translating)?;
        let audio = self
            .audio
            .filter(|a| !a.is_empty())
            .ok_or(Stage::Synthesizing)?;
        let audio_url = self
            .audio_url
            .filter(|u| !u.is_empty())
            .ok_or(Stage::Encoding)?;

        Ok(PipelineResult {
            request_id: self.request_id,
            original_text,
            translated_text,
            audio_bytes: audio.bytes,
            content_type: audio.content_type,
            audio_url,
            original_audio_url: self.original_audio_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_draft() -> PipelineDraft {
        let mut draft = PipelineDraft::new("req-1");
        draft.decoded();
        draft.transcribed("Hello".into());
        draft.translated("Hola".into());
        draft.synthesized(SynthesizedAudio::new(vec![1, 2, 3], "audio/mpeg"));
        draft.encoded("data:audio/mpeg;base64,AQID".into());
        draft
    }

    #[test]
    fn test_finish_complete() {
        let result = full_draft().finish().unwrap();
        assert_eq!(result.original_text, "Hello");
        assert_eq!(result.translated_text, "Hola");
        assert_eq!(result.audio_bytes, vec![1, 2, 3]);
        assert!(result.original_audio_url.is_none());
    }

    #[test]
    fn test_finish_reports_missing_stage() {
        let mut draft = PipelineDraft::new("req-2");
        draft.decoded();
        draft.transcribed("   ".into());
        assert_eq!(draft.finish().unwrap_err(), Stage::Transcribing);

        let mut draft = PipelineDraft::new("req-3");
        draft.transcribed("Hello".into());
        draft.translated(String::new());
        assert_eq!(draft.finish().unwrap_err(), Stage::Translating);
    }

    #[test]
    fn test_partial_tracks_progress() {
        let mut draft = PipelineDraft::new("req-4");
        draft.decoded();
        assert_eq!(draft.partial(), Partial::default());
        draft.transcribed("Hello".into());
        assert_eq!(draft.partial().original_text.as_deref(), Some("Hello"));
        assert_eq!(draft.last_stage(), Some(Stage::Transcribing));
    }

    #[test]
    #[should_panic(expected = "recorded after")]
    #[cfg(debug_assertions)]
    fn test_out_of_order_write_panics_in_debug() {
        let mut draft = PipelineDraft::new("req-5");
        draft.translated("Hola".into());
        draft.transcribed("Hello".into());
    }
}
