//! Failover speech-to-text: wraps several providers in priority order.
//!
//! On error the next provider in the list is tried. An empty transcript is a
//! successful answer and is returned as is.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::{SpeechToText, Transcript};

pub struct FailoverStt {
    providers: Vec<Arc<dyn SpeechToText>>,
    label: String,
}

impl FailoverStt {
    /// The first provider is primary; others are fallbacks.
    pub fn new(label: impl Into<String>, providers: Vec<Arc<dyn SpeechToText>>) -> Self {
        Self {
            providers,
            label: label.into(),
        }
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }
}

#[async_trait]
impl SpeechToText for FailoverStt {
    fn id(&self) -> &str {
        &self.label
    }

    async fn transcribe(&self, audio: &[u8], source_lang: &str) -> Result<Transcript, ServiceError> {
        let mut last_error = None;

        for (i, provider) in self.providers.iter().enumerate() {
            match provider.transcribe(audio, source_lang).await {
                Ok(transcript) => {
                    if i > 0 {
                        info!(provider = provider.id(), attempt = i + 1, "Failover succeeded");
                    }
                    return Ok(transcript);
                }
                Err(e) => {
                    warn!(
                        provider = provider.id(),
                        attempt = i + 1,
                        %e,
                        "STT provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ServiceError::not_configured(&self.label, "no STT providers configured")
        }))
    }
}
