//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::PipelineMode;

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Browser origins allowed by CORS.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Mode used by the plain `/ws` endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<String>,

    /// Maximum inbound WebSocket frame size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            cors_origins: default_cors_origins(),
            default_mode: None,
            max_payload_bytes: None,
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

// --- External services ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Provider: "elevenlabs", "openai" or "groq" (default: "elevenlabs").
    #[serde(default = "default_stt_provider")]
    pub provider: String,

    /// Providers tried in order when the primary fails.
    #[serde(default)]
    pub fallbacks: Vec<SttProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "scribe_v1", "whisper-1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: default_stt_provider(),
            fallbacks: Vec::new(),
            api_key: None,
            api_key_env: None,
            model: None,
            base_url: None,
        }
    }
}

fn default_stt_provider() -> String {
    "elevenlabs".into()
}

impl SttConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| env_key_for(&self.provider))
    }

    /// The primary provider followed by the configured fallbacks.
    pub fn chain(&self) -> Vec<SttProviderConfig> {
        let mut chain = vec![SttProviderConfig {
            provider: self.provider.clone(),
            api_key: self.api_key.clone(),
            api_key_env: self.api_key_env.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }];
        chain.extend(self.fallbacks.iter().cloned());
        chain
    }
}

/// One entry of the STT failover chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttProviderConfig {
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl SttProviderConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| env_key_for(&self.provider))
    }
}

/// Translation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Provider (default: "libretranslate").
    #[serde(default = "default_translation_provider")]
    pub provider: String,

    /// Endpoint URL (default: the public LibreTranslate instance).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: default_translation_provider(),
            url: None,
            api_key: None,
            api_key_env: None,
        }
    }
}

fn default_translation_provider() -> String {
    "libretranslate".into()
}

impl TranslationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider: "elevenlabs" or "openai" (default: "elevenlabs").
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Voice ID or name hint. When unset a voice is picked per target language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,

    /// Model ID (e.g. "eleven_multilingual_v2", "tts-1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Output format (default: "mp3_44100_128").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            api_key_env: None,
            default_voice: None,
            default_model: None,
            output_format: None,
            base_url: None,
        }
    }
}

fn default_tts_provider() -> String {
    "elevenlabs".into()
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| env_key_for(&self.provider))
    }
}

/// Conventional environment variable holding a provider's API key.
fn env_key_for(provider: &str) -> Option<String> {
    let var = match provider {
        "elevenlabs" => "ELEVENLABS_API_KEY",
        "openai" => "OPENAI_API_KEY",
        "groq" => "GROQ_API_KEY",
        _ => return None,
    };
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

// --- Resilience ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerConfig>,

    /// Per-request HTTP timeout for external services (default: 30).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    4_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a trial call.
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    30
}

// --- Pipeline ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Blocking worker slots for codec work.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Largest decoded audio payload accepted.
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: usize,

    /// Synthesized clips kept for `/audio/{id}`.
    #[serde(default = "default_audio_cache_entries")]
    pub audio_cache_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_audio_bytes: default_max_audio_bytes(),
            audio_cache_entries: default_audio_cache_entries(),
        }
    }
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_audio_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_audio_cache_entries() -> usize {
    256
}

// --- Logging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "parley_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

const STT_PROVIDERS: &[&str] = &["elevenlabs", "openai", "groq"];
const TRANSLATION_PROVIDERS: &[&str] = &["libretranslate"];
const TTS_PROVIDERS: &[&str] = &["elevenlabs", "openai"];

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::ParleyError::Io)?;
        Self::from_json5(&raw)
    }

    /// Parse config text, substituting `${ENV_VAR}` references first.
    pub fn from_json5(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| crate::error::ParleyError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Expand `~` in a user-supplied config path.
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).as_ref())
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8000)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Mode used by `/ws`. Invalid values fall back to simple; `validate` reports them.
    pub fn default_mode(&self) -> PipelineMode {
        self.gateway
            .as_ref()
            .and_then(|g| g.default_mode.as_deref())
            .and_then(|m| m.parse().ok())
            .unwrap_or_default()
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.gateway
            .as_ref()
            .and_then(|g| g.max_payload_bytes)
            .unwrap_or(16 * 1024 * 1024)
    }

    pub fn stt(&self) -> SttConfig {
        self.services
            .as_ref()
            .and_then(|s| s.stt.clone())
            .unwrap_or_default()
    }

    pub fn translation(&self) -> TranslationConfig {
        self.services
            .as_ref()
            .and_then(|s| s.translation.clone())
            .unwrap_or_default()
    }

    pub fn tts(&self) -> TtsConfig {
        self.services
            .as_ref()
            .and_then(|s| s.tts.clone())
            .unwrap_or_default()
    }

    pub fn retry(&self) -> RetryConfig {
        self.resilience
            .as_ref()
            .and_then(|r| r.retry.clone())
            .unwrap_or_default()
    }

    pub fn breaker(&self) -> BreakerConfig {
        self.resilience
            .as_ref()
            .and_then(|r| r.breaker.clone())
            .unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .resilience
            .as_ref()
            .and_then(|r| r.request_timeout_secs)
            .unwrap_or(30);
        Duration::from_secs(secs)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "gateway.port").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let stt = self.stt();
        for entry in stt.chain() {
            if !STT_PROVIDERS.contains(&entry.provider.as_str()) {
                errors.push(format!("Unknown STT provider '{}'", entry.provider));
            } else if entry.resolve_api_key().is_none() {
                warnings.push(format!("STT provider '{}' has no API key configured", entry.provider));
            }
        }

        let translation = self.translation();
        if !TRANSLATION_PROVIDERS.contains(&translation.provider.as_str()) {
            errors.push(format!("Unknown translation provider '{}'", translation.provider));
        }

        let tts = self.tts();
        if !TTS_PROVIDERS.contains(&tts.provider.as_str()) {
            errors.push(format!("Unknown TTS provider '{}'", tts.provider));
        } else if tts.resolve_api_key().is_none() {
            warnings.push(format!("TTS provider '{}' has no API key configured", tts.provider));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if let Some(mode) = &gw.default_mode {
                if let Err(e) = mode.parse::<PipelineMode>() {
                    errors.push(e);
                }
            }
        }

        let retry = self.retry();
        if retry.max_attempts == 0 {
            errors.push("resilience.retry.max_attempts must be at least 1".to_string());
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            warnings.push("resilience.retry.base_delay_ms exceeds max_delay_ms".to_string());
        }

        if self.breaker().failure_threshold == 0 {
            errors.push("resilience.breaker.failure_threshold must be at least 1".to_string());
        }

        if self.pipeline().worker_threads == 0 {
            errors.push("pipeline.worker_threads must be at least 1".to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Parley data: `~/.parley/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("TEST_PARLEY_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_PARLEY_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_PARLEY_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_PARLEY_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8000);
        assert_eq!(config.bind_addr(), "127.0.0.1");
        assert_eq!(config.default_mode(), PipelineMode::Simple);
        assert_eq!(config.retry().max_attempts, 3);
        assert_eq!(config.breaker().failure_threshold, 5);
        assert_eq!(config.pipeline().max_audio_bytes, 10 * 1024 * 1024);
        assert_eq!(config.stt().provider, "elevenlabs");
        assert_eq!(config.translation().provider, "libretranslate");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/parley/config.json")).unwrap();
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                gateway: { port: 9100, default_mode: "parallel" },
                resilience: { retry: { max_attempts: 5 }, breaker: { timeout_secs: 10 } },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9100);
        assert_eq!(config.default_mode(), PipelineMode::Parallel);
        assert_eq!(config.retry().max_attempts, 5);
        assert_eq!(config.retry().base_delay_ms, 500);
        assert_eq!(config.breaker().timeout_secs, 10);
        assert_eq!(config.breaker().failure_threshold, 5);
    }

    #[test]
    fn test_stt_chain_order() {
        let config = Config::from_json5(
            r#"{ services: { stt: { provider: "openai", fallbacks: [{ provider: "elevenlabs" }, { provider: "groq" }] } } }"#,
        )
        .unwrap();
        let chain: Vec<String> = config.stt().chain().into_iter().map(|c| c.provider).collect();
        assert_eq!(chain, vec!["openai", "elevenlabs", "groq"]);
    }

    #[test]
    fn test_secret_direct_beats_env() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("TEST_PARLEY_TTS_KEY", "from-env") };
        let mut tts = TtsConfig {
            api_key_env: Some("TEST_PARLEY_TTS_KEY".into()),
            ..TtsConfig::default()
        };
        assert_eq!(tts.resolve_api_key(), Some("from-env".into()));
        tts.api_key = Some("direct-key".into());
        assert_eq!(tts.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_PARLEY_TTS_KEY") };
    }

    #[test]
    fn test_get_path() {
        let config = Config::from_json5(r#"{ gateway: { port: 9200 } }"#).unwrap();
        assert_eq!(config.get_path("gateway.port"), Some(serde_json::json!(9200)));
        assert!(config.get_path("gateway.nope").is_none());
    }

    #[test]
    fn test_validate_errors() {
        let config = Config::from_json5(
            r#"{
                gateway: { port: 0, default_mode: "turbo" },
                services: { tts: { provider: "piper" } },
                resilience: { retry: { max_attempts: 0 }, breaker: { failure_threshold: 0 } },
                pipeline: { worker_threads: 0 },
            }"#,
        )
        .unwrap();
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")));
        assert!(errors.iter().any(|e| e.contains("turbo")));
        assert!(errors.iter().any(|e| e.contains("piper")));
        assert!(errors.iter().any(|e| e.contains("max_attempts")));
        assert!(errors.iter().any(|e| e.contains("failure_threshold")));
        assert!(errors.iter().any(|e| e.contains("worker_threads")));
    }

    #[test]
    fn test_validate_missing_key_warns() {
        let config = Config::from_json5(
            r#"{ services: { stt: { provider: "groq", api_key_env: "PARLEY_TEST_UNSET_GROQ" } } }"#,
        )
        .unwrap();
        let (warnings, _errors) = config.validate();
        // Only meaningful when GROQ_API_KEY is absent from the test environment.
        if std::env::var("GROQ_API_KEY").is_err() {
            assert!(warnings.iter().any(|w| w.contains("groq")));
        }
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = Config::from_json5(r#"{ logging: {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }
}
