use thiserror::Error;

use parley_core::types::{ServiceKind, Stage};
use parley_media::DecodeError;
use parley_providers::ServiceError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("encoding failed: {0}")]
    Encode(#[source] DecodeError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: ServiceError,
    },

    #[error("{stage} skipped: circuit open for {service}")]
    CircuitOpen { stage: Stage, service: ServiceKind },

    #[error("{stage} produced an empty result")]
    EmptyResult { stage: Stage },

    #[error("session outbox closed")]
    ChannelClosed,
}

impl PipelineError {
    /// Classify a service failure raised while running `stage`.
    pub fn from_service(stage: Stage, error: ServiceError) -> Self {
        match error {
            ServiceError::CircuitOpen(open) => Self::CircuitOpen {
                stage,
                service: open.service,
            },
            source => Self::Stage { stage, source },
        }
    }

    /// The stage that failed, if the failure belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Decode(_) => Some(Stage::Decoding),
            Self::Encode(_) => Some(Stage::Encoding),
            Self::Stage { stage, .. }
            | Self::CircuitOpen { stage, .. }
            | Self::EmptyResult { stage } => Some(*stage),
            Self::ChannelClosed => None,
        }
    }

    /// Text shown to the end user.
    ///
    /// Retry exhaustion and an open circuit read the same.
    pub fn user_message(&self) -> String {
        match self {
            Self::Decode(e) => format!("{}: {e}", Stage::Decoding.failure_message()),
            Self::Encode(_) => Stage::Encoding.failure_message().to_string(),
            Self::Stage { stage, .. } | Self::CircuitOpen { stage, .. } => {
                stage.failure_message().to_string()
            }
            Self::EmptyResult { stage } => {
                let detail = match stage {
                    Stage::Transcribing => "no speech detected",
                    Stage::Translating => "empty translation",
                    Stage::Synthesizing => "no audio produced",
                    Stage::Decoding | Stage::Encoding => "empty output",
                };
                format!("{}: {detail}", stage.failure_message())
            }
            Self::ChannelClosed => "Connection closed".to_string(),
        }
    }
}
