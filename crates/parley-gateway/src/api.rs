//! REST endpoints next to the WebSocket routes.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use parley_core::types::{ServiceKind, Stage};
use parley_providers::resilience::{CircuitState, ServiceGuard};
use parley_providers::{SUPPORTED_LANGUAGES, ServiceError};

use crate::state::GatewayState;

/// `GET /api/v1/capabilities/languages`
pub async fn languages_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let services = state.orchestrator.services();
    Json(json!({
        "stt": { "provider": services.stt.id(), "languages": SUPPORTED_LANGUAGES },
        "translation": { "provider": services.translator.id(), "languages": SUPPORTED_LANGUAGES },
        "tts": { "provider": services.tts.id(), "languages": SUPPORTED_LANGUAGES },
    }))
}

/// `GET /api/v1/capabilities/providers`
pub async fn providers_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let stt = state.config.stt();
    let fallbacks: Vec<&str> = stt.fallbacks.iter().map(|f| f.provider.as_str()).collect();
    let circuit = |kind| state.breakers.get(kind).state();

    Json(json!({
        "stt": {
            "primary": stt.provider,
            "fallbacks": fallbacks,
            "circuit": circuit(ServiceKind::Stt),
        },
        "translation": {
            "primary": state.config.translation().provider,
            "circuit": circuit(ServiceKind::Translation),
        },
        "tts": {
            "primary": state.config.tts().provider,
            "circuit": circuit(ServiceKind::Tts),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct TranslateBody {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_source() -> String {
    "en".into()
}

fn default_target() -> String {
    "es".into()
}

/// `POST /api/v1/translate`, guarded by the translation breaker.
pub async fn translate_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<TranslateBody>,
) -> Response {
    if body.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Text is required" })),
        )
            .into_response();
    }

    let guard = ServiceGuard::for_service(&state.breakers, ServiceKind::Translation, state.retry);
    let translator = &state.orchestrator.services().translator;
    let outcome = guard
        .run(|| translator.translate(&body.text, &body.source, &body.target))
        .await;

    match outcome {
        Ok(translated) => Json(json!({
            "translatedText": translated,
            "source": body.source,
            "target": body.target,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "REST translation failed");
            let status = match e {
                ServiceError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(json!({ "error": Stage::Translating.failure_message() })),
            )
                .into_response()
        }
    }
}

/// Largest upload `POST /api/v1/stt/transcribe` accepts.
pub const MAX_TRANSCRIBE_BYTES: usize = 10 * 1024 * 1024;

/// Language assumed when the upload carries no hint.
const DEFAULT_STT_LANGUAGE: &str = "en";

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `POST /api/v1/stt/transcribe`: multipart `audio` file plus an optional
/// `language` hint, guarded by the STT breaker.
pub async fn transcribe_handler(
    State(state): State<Arc<GatewayState>>,
    mut multipart: Multipart,
) -> Response {
    let mut audio: Option<Bytes> = None;
    let mut language: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_json(e.status(), e.body_text()),
        };
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("audio") => match field.bytes().await {
                Ok(bytes) => audio = Some(bytes),
                Err(e) => return error_json(e.status(), e.body_text()),
            },
            Some("language") => match field.text().await {
                Ok(text) if !text.trim().is_empty() => language = Some(text.trim().to_string()),
                Ok(_) => {}
                Err(e) => return error_json(e.status(), e.body_text()),
            },
            _ => {}
        }
    }

    let Some(audio) = audio else {
        return error_json(StatusCode::BAD_REQUEST, "Audio file is required");
    };
    if audio.len() > MAX_TRANSCRIBE_BYTES {
        return error_json(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Audio file too large. Max size: {MAX_TRANSCRIBE_BYTES} bytes"),
        );
    }
    if audio.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Empty audio file");
    }

    let hint = language.unwrap_or_else(|| DEFAULT_STT_LANGUAGE.to_string());
    info!(audio_bytes = audio.len(), language = %hint, "REST transcription request");

    let stt = &state.orchestrator.services().stt;
    let guard = ServiceGuard::for_service(&state.breakers, ServiceKind::Stt, state.retry);
    match guard.run(|| stt.transcribe(&audio, &hint)).await {
        Ok(transcript) => Json(json!({
            "text": transcript.text,
            "language": transcript.language.unwrap_or(hint),
            "confidence": transcript.confidence,
            "provider": stt.id(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "REST transcription failed");
            let status = match e {
                ServiceError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(json!({
                    "text": "",
                    "language": hint,
                    "provider": stt.id(),
                    "error": Stage::Transcribing.failure_message(),
                })),
            )
                .into_response()
        }
    }
}

/// `GET /api/v1/stt/languages`
pub async fn stt_languages_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "provider": state.orchestrator.services().stt.id(),
        "languages": SUPPORTED_LANGUAGES,
        "count": SUPPORTED_LANGUAGES.len(),
    }))
}

/// `GET /audio/{message_id}`: synthesized speech of a finished request.
pub async fn audio_handler(
    State(state): State<Arc<GatewayState>>,
    Path(message_id): Path<String>,
) -> Response {
    match state.orchestrator.cache().get(&message_id) {
        Some(audio) => ([(header::CONTENT_TYPE, audio.content_type)], audio.bytes).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Audio not found" })),
        )
            .into_response(),
    }
}

/// Whether any service circuit is currently open.
pub fn degraded(state: &GatewayState) -> bool {
    state
        .breakers
        .snapshot()
        .iter()
        .any(|b| b.state != CircuitState::Closed)
}
