//! Translation pipeline: decode, transcribe, translate, synthesize, encode.
//!
//! The [`Orchestrator`] runs one [`VoiceRequest`](parley_core::types::VoiceRequest)
//! through the stages and reports progress as a stream of [`PipelineEvent`]s
//! for the gateway to forward.

use serde::Serialize;

use parley_core::types::Stage;

pub mod background;
pub mod cache;
pub mod error;
pub mod orchestrator;
pub mod result;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use background::BackgroundTasks;
pub use cache::AudioCache;
pub use error::PipelineError;
pub use orchestrator::Orchestrator;
pub use result::{Partial, PipelineResult};

/// Immutable view of a request right after `stage` completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSnapshot {
    pub request_id: String,
    pub stage: Stage,
    pub partial: Partial,
}

/// Events emitted while a request moves through the pipeline.
///
/// A stream always ends with exactly one `Completed` or `Failed`.
#[derive(Debug)]
pub enum PipelineEvent {
    Started { request_id: String },
    Progress(StageSnapshot),
    Completed(PipelineResult),
    Failed {
        request_id: String,
        error: PipelineError,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }
}
