//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::config::Config;
use parley_core::types::PipelineMode;
use parley_media::{AudioCodec, WorkerPool};
use parley_pipeline::{AudioCache, BackgroundTasks, Orchestrator};
use parley_providers::Services;
use parley_providers::resilience::{BreakerRegistry, RetryPolicy};

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub breakers: Arc<BreakerRegistry>,
    pub retry: RetryPolicy,
    pub connections: RwLock<HashMap<String, ConnectionState>>,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: String,
    pub mode: PipelineMode,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    /// Wire `services` into a fresh orchestrator sized from `config`.
    pub fn new(config: Arc<Config>, services: Services) -> Self {
        let pipeline = config.pipeline();
        let breakers = Arc::new(BreakerRegistry::from_config(&config.breaker()));
        let retry = RetryPolicy::from_config(&config.retry());
        let codec = AudioCodec::new(WorkerPool::new(pipeline.worker_threads), pipeline.max_audio_bytes);

        let orchestrator = Arc::new(Orchestrator::new(
            services,
            &breakers,
            retry,
            codec,
            BackgroundTasks::new(),
            AudioCache::new(pipeline.audio_cache_entries),
        ));

        Self {
            config,
            orchestrator,
            breakers,
            retry,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Build provider clients from `config`, then the state around them.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let services = Services::from_config(&config)?;
        Ok(Self::new(Arc::new(config), services))
    }

    pub fn default_mode(&self) -> PipelineMode {
        self.config.default_mode()
    }

    pub fn background(&self) -> &BackgroundTasks {
        self.orchestrator.background()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
