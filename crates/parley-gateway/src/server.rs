//! Axum-based HTTP and WebSocket server.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::HeaderValue,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_core::types::PipelineMode;

use crate::api;
use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Room for multipart boundaries and headers around an upload.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// All gateway routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(&state.config.gateway().cors_origins);

    let app = Router::new()
        .route("/ws", get(ws_default_handler))
        .route("/ws/stream", get(ws_stream_handler))
        .route("/ws/parallel", get(ws_parallel_handler))
        .route("/health", get(health_handler))
        .route("/audio/{message_id}", get(api::audio_handler))
        .route("/api/v1/capabilities/languages", get(api::languages_handler))
        .route("/api/v1/capabilities/providers", get(api::providers_handler))
        .route("/api/v1/translate", post(api::translate_handler))
        .route(
            "/api/v1/stt/transcribe",
            post(api::transcribe_handler)
                .layer(DefaultBodyLimit::max(api::MAX_TRANSCRIBE_BYTES + MULTIPART_OVERHEAD)),
        )
        .route("/api/v1/stt/languages", get(api::stt_languages_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(cors).layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the gateway on the configured address and run until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr(), state.config.gateway_port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    #[cfg(feature = "metrics")]
    crate::metrics::install_prometheus_recorder()?;

    serve(state, listener, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves, then drain background tasks.
pub async fn serve<F>(
    state: Arc<GatewayState>,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    state.background().drain().await;
    info!("Gateway stopped");
    Ok(())
}

async fn ws_default_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let mode = state.default_mode();
    upgrade(ws, state, mode)
}

async fn ws_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    upgrade(ws, state, PipelineMode::Streaming)
}

async fn ws_parallel_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    upgrade(ws, state, PipelineMode::Parallel)
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<GatewayState>, mode: PipelineMode) -> impl IntoResponse {
    let max_size = state.config.max_payload_bytes();
    ws.max_message_size(max_size)
        .on_upgrade(move |socket| handle_ws_connection(state, socket, mode))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.connection_count().await;
    let status = if api::degraded(&state) { "degraded" } else { "ok" };

    axum::Json(json!({
        "status": status,
        "version": version,
        "connections": connections,
        "background_tasks": state.background().pending(),
        "breakers": state.breakers.snapshot(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    crate::metrics::render().unwrap_or_default()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for Ctrl+C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
