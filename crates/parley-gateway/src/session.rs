//! Per-connection request handling: parse, dispatch, forward.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::protocol::{
    OutboundEvent, StageData, SttResultData, TranslationData, TranslationResultData,
};
use parley_core::types::{PipelineMode, Stage, VoiceRequest};
use parley_pipeline::{Orchestrator, PipelineError, PipelineEvent, PipelineResult};

/// Write side of a connection.
///
/// Once closed, every delivery fails with `ChannelClosed` without touching
/// the socket.
#[derive(Debug, Clone)]
pub struct SessionOutbox {
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl SessionOutbox {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            closed: CancellationToken::new(),
        }
    }

    pub fn deliver(&self, event: &OutboundEvent) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::ChannelClosed);
        }
        let frame = encode_frame(event, event.kind());
        self.tx.send(frame).map_err(|_| PipelineError::ChannelClosed)
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Sent in place of an event that cannot be serialized.
const FALLBACK_FRAME: &str = r#"{"type":"error","message":"Internal server error"}"#;

fn encode_frame<T: Serialize>(event: &T, kind: &str) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| {
        warn!(event = kind, %e, "Failed to serialize event, sending generic error");
        FALLBACK_FRAME.to_string()
    })
}

/// One client's view of the pipeline, fixed to the mode of its endpoint.
pub struct Session {
    conn_id: String,
    mode: PipelineMode,
    orchestrator: Arc<Orchestrator>,
    outbox: SessionOutbox,
}

impl Session {
    pub fn new(
        conn_id: impl Into<String>,
        mode: PipelineMode,
        orchestrator: Arc<Orchestrator>,
        outbox: SessionOutbox,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            mode,
            orchestrator,
            outbox,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    /// Handle one inbound text frame.
    ///
    /// Invalid frames answer with a single `error` event and leave the
    /// session open.
    pub async fn receive(&self, frame: String) -> Option<JoinHandle<()>> {
        let parsed = self
            .orchestrator
            .codec()
            .parse_inbound(frame)
            .await
            .map_err(|e| e.to_string())
            .and_then(|message| message.into_request().map_err(|e| e.to_string()));

        match parsed {
            Ok(request) => Some(self.dispatch(request)),
            Err(message) => {
                warn!(conn_id = %self.conn_id, %message, "Rejected inbound message");
                let _ = self.outbox.deliver(&OutboundEvent::error(message));
                None
            }
        }
    }

    /// Run `request` on its own task and forward its events.
    pub fn dispatch(&self, request: VoiceRequest) -> JoinHandle<()> {
        debug!(
            conn_id = %self.conn_id,
            request_id = %request.request_id,
            audio = request.input.is_audio(),
            mode = %self.mode,
            "Dispatching request"
        );
        let events = self.orchestrator.stream(request, self.mode);
        tokio::spawn(forward(
            events,
            self.outbox.clone(),
            self.mode,
            self.conn_id.clone(),
        ))
    }
}

async fn forward<S>(mut events: S, outbox: SessionOutbox, mode: PipelineMode, conn_id: String)
where
    S: Stream<Item = PipelineEvent> + Send + Unpin,
{
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    while let Some(event) = events.next().await {
        #[cfg(feature = "metrics")]
        match &event {
            PipelineEvent::Completed(_) => {
                crate::metrics::record_request(mode.as_str(), start.elapsed().as_secs_f64());
            }
            PipelineEvent::Failed { error, .. } => {
                crate::metrics::record_request(mode.as_str(), start.elapsed().as_secs_f64());
                crate::metrics::record_failure(error.stage().map(Stage::as_str).unwrap_or("session"));
            }
            _ => {}
        }

        for out in render(&event, mode) {
            if outbox.deliver(&out).is_err() {
                debug!(conn_id = %conn_id, event = out.kind(), "Connection closed; discarding events");
                return;
            }
        }
    }
}

/// Translate a pipeline event into the wire events a `mode` client expects.
pub fn render(event: &PipelineEvent, mode: PipelineMode) -> Vec<OutboundEvent> {
    match event {
        PipelineEvent::Started { request_id } if mode.emits_progress() => {
            vec![OutboundEvent::ProcessingStarted {
                data: StageData {
                    stage: Stage::Decoding,
                    message_id: request_id.clone(),
                },
            }]
        }
        PipelineEvent::Started { .. } => Vec::new(),
        PipelineEvent::Progress(snapshot) if mode.emits_progress() => {
            let message_id = snapshot.request_id.clone();
            let mut out = vec![OutboundEvent::ProcessingUpdate {
                data: StageData {
                    stage: snapshot.stage,
                    message_id: message_id.clone(),
                },
            }];
            let partial = &snapshot.partial;
            match snapshot.stage {
                Stage::Transcribing => {
                    if let Some(text) = &partial.original_text {
                        out.push(OutboundEvent::SttResult {
                            data: SttResultData {
                                original_text: text.clone(),
                                message_id,
                            },
                        });
                    }
                }
                Stage::Translating => {
                    if let Some(text) = &partial.translated_text {
                        out.push(OutboundEvent::TranslationResult {
                            data: TranslationResultData {
                                translated_text: text.clone(),
                                message_id,
                            },
                        });
                    }
                }
                _ => {}
            }
            out
        }
        PipelineEvent::Progress(_) => Vec::new(),
        PipelineEvent::Completed(result) => {
            let data = translation_data(result);
            if mode.emits_progress() {
                vec![OutboundEvent::TranslationComplete { data }]
            } else {
                vec![OutboundEvent::Translation { data }]
            }
        }
        PipelineEvent::Failed { error, .. } => {
            let message = error.user_message();
            let event = match error.stage() {
                Some(stage) => OutboundEvent::stage_error(stage, message),
                None => OutboundEvent::error(message),
            };
            vec![event]
        }
    }
}

fn translation_data(result: &PipelineResult) -> TranslationData {
    let audio_url_translated = result
        .original_audio_url
        .as_ref()
        .map(|_| result.audio_url.clone());
    TranslationData {
        message_id: result.request_id.clone(),
        original_text: result.original_text.clone(),
        translated_text: result.translated_text.clone(),
        audio_url: result.audio_url.clone(),
        audio_url_original: result.original_audio_url.clone(),
        audio_url_translated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::config::Config;
    use parley_core::types::VoiceInput;
    use parley_pipeline::testing::{StubStt, StubTranslator, StubTts, Stubs};
    use parley_pipeline::{Partial, StageSnapshot};

    use crate::state::GatewayState;

    fn session(stubs: &Stubs, mode: PipelineMode) -> (Session, mpsc::UnboundedReceiver<String>) {
        let state = GatewayState::new(Arc::new(Config::default()), stubs.services());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new("conn-1", mode, state.orchestrator.clone(), SessionOutbox::new(tx));
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn text_request(text: &str) -> VoiceRequest {
        VoiceRequest::new(VoiceInput::Text(text.into()), "en", "es", "alice")
    }

    fn result(original_audio_url: Option<&str>) -> PipelineResult {
        PipelineResult {
            request_id: "req-1".into(),
            original_text: "Hello".into(),
            translated_text: "Hola".into(),
            audio_bytes: b"mp3".to_vec(),
            content_type: "audio/mpeg".into(),
            audio_url: "data:audio/mpeg;base64,bXAz".into(),
            original_audio_url: original_audio_url.map(String::from),
        }
    }

    #[test]
    fn test_simple_mode_renders_only_final_event() {
        let started = PipelineEvent::Started {
            request_id: "req-1".into(),
        };
        let progress = PipelineEvent::Progress(StageSnapshot {
            request_id: "req-1".into(),
            stage: Stage::Transcribing,
            partial: Partial {
                original_text: Some("Hello".into()),
                ..Default::default()
            },
        });
        assert!(render(&started, PipelineMode::Simple).is_empty());
        assert!(render(&progress, PipelineMode::Simple).is_empty());

        let done = render(&PipelineEvent::Completed(result(None)), PipelineMode::Simple);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].kind(), "translation");
    }

    #[test]
    fn test_streaming_progress_carries_partial_text() {
        let progress = PipelineEvent::Progress(StageSnapshot {
            request_id: "req-1".into(),
            stage: Stage::Transcribing,
            partial: Partial {
                original_text: Some("Hello".into()),
                ..Default::default()
            },
        });
        let out = render(&progress, PipelineMode::Streaming);
        let kinds: Vec<_> = out.iter().map(OutboundEvent::kind).collect();
        assert_eq!(kinds, ["processing_update", "stt_result"]);

        let synth = PipelineEvent::Progress(StageSnapshot {
            request_id: "req-1".into(),
            stage: Stage::Synthesizing,
            partial: Partial::default(),
        });
        assert_eq!(render(&synth, PipelineMode::Streaming).len(), 1);
    }

    #[test]
    fn test_parallel_final_event_has_both_urls() {
        let out = render(
            &PipelineEvent::Completed(result(Some("data:audio/mpeg;base64,b3Jp"))),
            PipelineMode::Parallel,
        );
        let OutboundEvent::TranslationComplete { data } = &out[0] else {
            panic!("expected translation_complete, got {:?}", out[0]);
        };
        assert_eq!(data.audio_url_original.as_deref(), Some("data:audio/mpeg;base64,b3Jp"));
        assert_eq!(data.audio_url_translated.as_deref(), Some(data.audio_url.as_str()));
    }

    #[test]
    fn test_failure_renders_stage_error() {
        let failed = PipelineEvent::Failed {
            request_id: "req-1".into(),
            error: PipelineError::EmptyResult {
                stage: Stage::Transcribing,
            },
        };
        let out = render(&failed, PipelineMode::Simple);
        assert_eq!(
            out,
            vec![OutboundEvent::stage_error(
                Stage::Transcribing,
                "Speech recognition failed: no speech detected"
            )]
        );
    }

    #[test]
    fn test_outbox_closed_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = SessionOutbox::new(tx);
        outbox.deliver(&OutboundEvent::error("first")).unwrap();
        outbox.close();
        assert!(outbox.is_closed());
        assert!(matches!(
            outbox.deliver(&OutboundEvent::error("second")),
            Err(PipelineError::ChannelClosed)
        ));
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"error","message":"first"}"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unserializable_event_becomes_generic_error() {
        use std::collections::HashMap;

        // Non-string map keys cannot be written as JSON.
        let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        let frame = encode_frame(&bad, "bad");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Internal server error");

        let ok = encode_frame(&OutboundEvent::error("x"), "error");
        assert_eq!(ok, r#"{"type":"error","message":"x"}"#);
    }

    #[tokio::test]
    async fn test_malformed_frames_answer_with_one_error_each() {
        let stubs = Stubs::hello();
        let (session, mut rx) = session(&stubs, PipelineMode::Simple);

        assert!(session.receive("not json".into()).await.is_none());
        assert!(
            session
                .receive(r#"{"text":"Hello","target_lang":"es","sender_id":"a"}"#.into())
                .await
                .is_none()
        );
        assert!(
            session
                .receive(r#"{"source_lang":"en","target_lang":"es","sender_id":"a"}"#.into())
                .await
                .is_none()
        );

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f["type"] == "error"));
        assert!(frames[0]["message"].as_str().unwrap().starts_with("Invalid message format"));
        assert_eq!(frames[2]["message"], "No text or audio data provided");
        assert_eq!(stubs.translator.calls(), 0);
    }

    #[tokio::test]
    async fn test_text_request_in_simple_mode() {
        let stubs = Stubs::hello();
        let (session, mut rx) = session(&stubs, PipelineMode::Simple);

        let handle = session
            .receive(
                r#"{"text":"Hello","source_lang":"en","target_lang":"es","sender_id":"alice"}"#
                    .into(),
            )
            .await
            .unwrap();
        handle.await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "translation");
        assert_eq!(frames[0]["data"]["original_text"], "Hello");
        assert_eq!(frames[0]["data"]["translated_text"], "Hola");
        assert!(!frames[0]["data"]["audio_url"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_streaming_event_order() {
        let stubs = Stubs::hello();
        let (session, mut rx) = session(&stubs, PipelineMode::Streaming);

        session.dispatch(text_request("Hello")).await.unwrap();

        let kinds: Vec<String> = drain(&mut rx)
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            [
                "processing_started",
                "processing_update",
                "processing_update",
                "stt_result",
                "processing_update",
                "translation_result",
                "processing_update",
                "processing_update",
                "translation_complete",
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_session_still_runs_pipeline() {
        let stubs = Stubs::new(
            StubStt::returning("Hello"),
            StubTranslator::with_delay(std::time::Duration::from_millis(50)),
            StubTts::new(),
        );
        let (session, mut rx) = session(&stubs, PipelineMode::Streaming);

        let request = text_request("Hello");
        let request_id = request.request_id.clone();
        let handle = session.dispatch(request);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        session.outbox.close();
        assert_eq!(drain(&mut rx).len(), 4);

        handle.await.unwrap();
        for _ in 0..50 {
            if stubs.tts.calls() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        session.orchestrator.background().drain().await;

        assert_eq!(stubs.translator.calls(), 1);
        assert_eq!(stubs.tts.calls(), 1);
        assert!(session.orchestrator.cache().get(&request_id).is_some());
        assert!(rx.try_recv().is_err());
    }
}
