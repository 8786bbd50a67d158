//! Runs a request through the stages and reports progress.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use parley_core::types::{PipelineMode, ServiceKind, Stage, SynthesizedAudio, VoiceInput, VoiceRequest};
use parley_media::AudioCodec;
use parley_providers::Services;
use parley_providers::resilience::{BreakerRegistry, CircuitState, RetryPolicy, ServiceGuard};

use crate::background::BackgroundTasks;
use crate::cache::AudioCache;
use crate::error::PipelineError;
use crate::result::{PipelineDraft, PipelineResult};
use crate::{PipelineEvent, StageSnapshot};

pub type ProgressSender = mpsc::UnboundedSender<StageSnapshot>;

/// Input after the decoding stage.
enum Decoded<'a> {
    Text(&'a str),
    Audio(Vec<u8>),
}

pub struct Orchestrator {
    services: Services,
    stt_guard: ServiceGuard,
    translation_guard: ServiceGuard,
    tts_guard: ServiceGuard,
    codec: AudioCodec,
    background: BackgroundTasks,
    cache: AudioCache,
}

impl Orchestrator {
    pub fn new(
        services: Services,
        breakers: &BreakerRegistry,
        policy: RetryPolicy,
        codec: AudioCodec,
        background: BackgroundTasks,
        cache: AudioCache,
    ) -> Self {
        Self {
            services,
            stt_guard: ServiceGuard::for_service(breakers, ServiceKind::Stt, policy),
            translation_guard: ServiceGuard::for_service(breakers, ServiceKind::Translation, policy),
            tts_guard: ServiceGuard::for_service(breakers, ServiceKind::Tts, policy),
            codec,
            background,
            cache,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn codec(&self) -> &AudioCodec {
        &self.codec
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Run `request` to completion, sending a snapshot after each stage.
    ///
    /// Snapshots are sent without waiting; a dropped receiver is ignored.
    pub async fn run(
        &self,
        request: &VoiceRequest,
        mode: PipelineMode,
        progress: &ProgressSender,
    ) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        debug!(
            request_id = %request.request_id,
            mode = %mode,
            audio = request.input.is_audio(),
            "Pipeline started"
        );

        let outcome = self.execute(request, mode, progress).await;
        self.after_run(request, mode, &outcome, start.elapsed());
        outcome
    }

    /// Run `request` on its own task and return its events as a stream.
    ///
    /// The pipeline keeps running if the stream is dropped.
    pub fn stream(
        self: &Arc<Self>,
        request: VoiceRequest,
        mode: PipelineMode,
    ) -> UnboundedReceiverStream<PipelineEvent> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let request_id = request.request_id.clone();
            let _ = event_tx.send(PipelineEvent::Started {
                request_id: request_id.clone(),
            });

            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let run = this.run(&request, mode, &progress_tx);
            tokio::pin!(run);

            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(snapshot) = progress_rx.recv() => {
                        let _ = event_tx.send(PipelineEvent::Progress(snapshot));
                    }
                    outcome = &mut run => break outcome,
                }
            };
            while let Ok(snapshot) = progress_rx.try_recv() {
                let _ = event_tx.send(PipelineEvent::Progress(snapshot));
            }

            let last = match outcome {
                Ok(result) => PipelineEvent::Completed(result),
                Err(error) => PipelineEvent::Failed { request_id, error },
            };
            let _ = event_tx.send(last);
        });

        UnboundedReceiverStream::new(event_rx)
    }

    async fn execute(
        &self,
        request: &VoiceRequest,
        mode: PipelineMode,
        progress: &ProgressSender,
    ) -> Result<PipelineResult, PipelineError> {
        let mut draft = PipelineDraft::new(request.request_id.clone());

        let decoded = self.decode(request).await?;
        draft.decoded();
        emit(progress, Stage::Decoding, &draft);

        let original_text = self.transcribe(request, decoded).await?;
        draft.transcribed(original_text.clone());
        emit(progress, Stage::Transcribing, &draft);

        if mode == PipelineMode::Parallel {
            let (chain, original_audio_url) = tokio::join!(
                self.translate_and_speak(request, &original_text, &mut draft, progress),
                self.speak_original(request, &original_text),
            );
            chain?;
            if let Some(url) = original_audio_url {
                draft.set_original_audio_url(url);
            }
        } else {
            self.translate_and_speak(request, &original_text, &mut draft, progress)
                .await?;
        }

        draft
            .finish()
            .map_err(|stage| PipelineError::EmptyResult { stage })
    }

    async fn decode<'a>(&self, request: &'a VoiceRequest) -> Result<Decoded<'a>, PipelineError> {
        match &request.input {
            VoiceInput::Text(text) => Ok(Decoded::Text(text)),
            VoiceInput::Audio(payload) => {
                let bytes = self.codec.decode(payload.clone()).await?;
                Ok(Decoded::Audio(bytes))
            }
        }
    }

    async fn transcribe(
        &self,
        request: &VoiceRequest,
        decoded: Decoded<'_>,
    ) -> Result<String, PipelineError> {
        let text = match decoded {
            Decoded::Text(text) => text.to_string(),
            Decoded::Audio(bytes) => {
                let stt = &self.services.stt;
                let source_lang = request.source_lang.as_str();
                let transcript = self
                    .stt_guard
                    .run(|| stt.transcribe(&bytes, source_lang))
                    .await
                    .map_err(|e| PipelineError::from_service(Stage::Transcribing, e))?;
                transcript.text
            }
        };

        if text.trim().is_empty() {
            return Err(PipelineError::EmptyResult {
                stage: Stage::Transcribing,
            });
        }
        Ok(text)
    }

    /// Translating, Synthesizing and Encoding, in order.
    async fn translate_and_speak(
        &self,
        request: &VoiceRequest,
        original_text: &str,
        draft: &mut PipelineDraft,
        progress: &ProgressSender,
    ) -> Result<(), PipelineError> {
        let translated = self.translate(request, original_text).await?;
        draft.translated(translated.clone());
        emit(progress, Stage::Translating, draft);

        let audio = self.synthesize(&translated, &request.target_lang).await?;
        draft.synthesized(audio.clone());
        emit(progress, Stage::Synthesizing, draft);

        let audio_url = self.codec.encode(audio).await.map_err(PipelineError::Encode)?;
        draft.encoded(audio_url);
        emit(progress, Stage::Encoding, draft);
        Ok(())
    }

    async fn translate(&self, request: &VoiceRequest, text: &str) -> Result<String, PipelineError> {
        let translator = &self.services.translator;
        let (source, target) = (request.source_lang.as_str(), request.target_lang.as_str());
        let translated = self
            .translation_guard
            .run(|| translator.translate(text, source, target))
            .await
            .map_err(|e| PipelineError::from_service(Stage::Translating, e))?;

        if translated.trim().is_empty() {
            return Err(PipelineError::EmptyResult {
                stage: Stage::Translating,
            });
        }
        Ok(translated)
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<SynthesizedAudio, PipelineError> {
        let tts = &self.services.tts;
        let audio = self
            .tts_guard
            .run(|| tts.synthesize(text, lang))
            .await
            .map_err(|e| PipelineError::from_service(Stage::Synthesizing, e))?;

        if audio.is_empty() {
            return Err(PipelineError::EmptyResult {
                stage: Stage::Synthesizing,
            });
        }
        Ok(audio)
    }

    /// Original-language speech for parallel mode. Failures only leave the URL unset.
    ///
    /// Runs only while the TTS circuit is closed, so a recovery trial is
    /// always spent on the translated speech.
    async fn speak_original(&self, request: &VoiceRequest, text: &str) -> Option<String> {
        let circuit = self.tts_guard.circuit_state();
        if circuit != CircuitState::Closed {
            debug!(request_id = %request.request_id, ?circuit, "Skipping original-language speech");
            return None;
        }
        let audio = match self.synthesize(text, &request.source_lang).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Original-language speech failed");
                return None;
            }
        };
        match self.codec.encode(audio).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Original-language encoding failed");
                None
            }
        }
    }

    /// Schedule side effects without waiting on them.
    fn after_run(
        &self,
        request: &VoiceRequest,
        mode: PipelineMode,
        outcome: &Result<PipelineResult, PipelineError>,
        elapsed: Duration,
    ) {
        let request_id = request.request_id.clone();
        let sender_id = request.sender_id.clone();
        let languages = format!("{}->{}", request.source_lang, request.target_lang);
        let queued_ms = (chrono::Utc::now() - request.received_at).num_milliseconds();
        let duration_ms = whole_millis(elapsed);
        let failed_stage = outcome.as_ref().err().and_then(PipelineError::stage);

        self.background.schedule("analytics", async move {
            match failed_stage {
                None => info!(
                    request_id,
                    sender_id,
                    languages,
                    mode = %mode,
                    duration_ms,
                    queued_ms,
                    "Translation completed"
                ),
                Some(stage) => info!(
                    request_id,
                    sender_id,
                    languages,
                    mode = %mode,
                    duration_ms,
                    stage = %stage,
                    "Translation failed"
                ),
            }
            Ok(())
        });

        if let Ok(result) = outcome {
            let cache = self.cache.clone();
            let message_id = result.request_id.clone();
            let audio = SynthesizedAudio::new(result.audio_bytes.clone(), result.content_type.clone());
            self.background.schedule("audio-cache", async move {
                cache.insert(message_id, audio);
                Ok(())
            });
        }
    }
}

/// Milliseconds in `elapsed`, saturating at `u64::MAX`.
fn whole_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn emit(progress: &ProgressSender, stage: Stage, draft: &PipelineDraft) {
    let _ = progress.send(StageSnapshot {
        request_id: draft.request_id().to_string(),
        stage,
        partial: draft.partial(),
    });
}
