use thiserror::Error;

/// Errors that can occur while persisting or loading records
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors returned by an individual LLM backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend communication failed: {0}")]
    BackendError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors surfaced by the AI gateway to its callers
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Model request timed out")]
    Timeout,

    #[error("Failed to generate AI response: {0}")]
    GenerationFailed(#[from] BackendError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur while analyzing an incident
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analysis request failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Failed to store analysis: {0}")]
    Store(#[from] StoreError),
}
