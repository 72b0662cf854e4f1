use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration loaded from a TOML file
///
/// Every section falls back to its defaults, so an empty file (or no file at
/// all) yields a working monitor that probes httpbin every five minutes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub scheduler: SchedulerConfig,
    pub detection: DetectionConfig,
    pub ai: AiConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// Target endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// URL that receives the synthetic POST payload
    pub target_url: String,
    /// HTTP method recorded on each observation
    pub method: String,
    /// Request timeout; an expired probe is recorded as a transport failure
    pub timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_url: "https://httpbin.org/anything".to_string(),
            method: "POST".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ProbeConfig {
    /// Target URL without its scheme, used as the incident's affected endpoint
    pub fn endpoint_label(&self) -> String {
        let url = self.target_url.as_str();
        url.split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Periodic firing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
        }
    }
}

/// Anomaly thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Latencies strictly above this value open a latency incident
    pub latency_threshold_ms: f64,
    /// Statuses at or above this value open an error incident
    pub error_status_threshold: u16,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            latency_threshold_ms: 2000.0,
            error_status_threshold: 500,
        }
    }
}

/// AI gateway settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub backend: AIBackendConfig,
    pub rate_limit_max_calls: usize,
    pub rate_limit_window_seconds: u64,
    pub cache_ttl_seconds: u64,
    /// USD per million input tokens
    pub input_cost_per_million: f64,
    /// USD per million output tokens
    pub output_cost_per_million: f64,
    /// Upper bound on a single model call
    pub request_timeout_seconds: u64,
    /// Whether a cache hit spends a rate-limit slot
    pub cache_hits_consume_quota: bool,
    /// Whether chat prompts go through the query-generation pass first
    pub intent_queries: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            backend: AIBackendConfig::default(),
            rate_limit_max_calls: 50,
            rate_limit_window_seconds: 60 * 60,
            cache_ttl_seconds: 60 * 60 * 24 * 7,
            input_cost_per_million: 0.075,
            output_cost_per_million: 0.30,
            request_timeout_seconds: 60,
            cache_hits_consume_quota: false,
            intent_queries: true,
        }
    }
}

/// LLM backend selection
///
/// A missing API key is not an error: the gateway answers with a
/// deterministic mock response instead of calling the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AIBackendConfig {
    Gemini {
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_gemini_model")]
        model: String,
    },
    #[serde(rename = "openai")]
    OpenAI {
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default = "default_openai_base_url")]
        base_url: String,
    },
    Ollama {
        #[serde(default = "default_ollama_endpoint")]
        endpoint: String,
        #[serde(default = "default_ollama_model")]
        model: String,
    },
    Mock,
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3".to_string()
}

impl Default for AIBackendConfig {
    fn default() -> Self {
        AIBackendConfig::Gemini {
            api_key: None,
            model: default_gemini_model(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the JSON-lines journals; records stay in memory only when unset
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.probe.target_url.starts_with("http://")
            || self.probe.target_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "probe.target_url must be an http(s) URL, got '{}'",
                self.probe.target_url
            )));
        }
        if self.probe.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "probe.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.interval_seconds must be greater than 0".to_string(),
            ));
        }
        if !(self.detection.latency_threshold_ms > 0.0) {
            return Err(ConfigError::ValidationError(
                "detection.latency_threshold_ms must be positive".to_string(),
            ));
        }
        if !(100..=599).contains(&self.detection.error_status_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "detection.error_status_threshold must be an HTTP status, got {}",
                self.detection.error_status_threshold
            )));
        }
        if self.ai.rate_limit_max_calls == 0 || self.ai.rate_limit_window_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "ai rate limit quota and window must be greater than 0".to_string(),
            ));
        }
        if self.ai.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "ai.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.ai.input_cost_per_million < 0.0 || self.ai.output_cost_per_million < 0.0 {
            return Err(ConfigError::ValidationError(
                "ai token costs cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Fill missing API keys from the environment
    ///
    /// `GEMINI_API_KEY` and `OPENAI_API_KEY` are only consulted when the file
    /// did not set a key. Empty values count as missing.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let (api_key, var) = match &mut self.ai.backend {
            AIBackendConfig::Gemini { api_key, .. } => (api_key, "GEMINI_API_KEY"),
            AIBackendConfig::OpenAI { api_key, .. } => (api_key, "OPENAI_API_KEY"),
            AIBackendConfig::Ollama { .. } | AIBackendConfig::Mock => return,
        };
        if api_key.as_deref().map_or(true, str::is_empty) {
            *api_key = lookup(var).filter(|value| !value.is_empty());
        }
    }
}
