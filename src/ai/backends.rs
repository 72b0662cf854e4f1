use crate::config::AIBackendConfig;
use crate::error::BackendError;
use log::{info, warn};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Boxed future returned by backend operations
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Text produced by a model
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Output token count reported by the model, when it reports one
    pub output_tokens: Option<u64>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            output_tokens: None,
        }
    }
}

/// Rough token estimate used when a model cannot count for us
///
/// Assumes four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Trait for LLM backend implementations
pub trait LLMBackend: Send + Sync {
    /// Generate text for a single prompt
    fn generate<'a>(&'a self, prompt: &'a str) -> BackendFuture<'a, Completion>;

    /// Count the tokens a prompt would consume
    ///
    /// Backends without a counting endpoint fall back to [`estimate_tokens`].
    fn count_tokens<'a>(&'a self, text: &'a str) -> BackendFuture<'a, u64> {
        Box::pin(async move { Ok(estimate_tokens(text)) })
    }

    /// Model identifier recorded in usage records
    fn model(&self) -> &str;
}

/// HTTP timeout used when no request timeout is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Added to the HTTP client timeout so the gateway's deadline expires first
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Build the backend selected in the `[ai.backend]` configuration
///
/// Returns `None` when no model should be called: either the mock backend is
/// selected or the hosted backend has no API key. Callers then answer with a
/// simulated response. The HTTP client outlives `request_timeout` slightly so
/// an expired call surfaces as a gateway timeout, not a transport error.
pub fn from_config(
    config: &AIBackendConfig,
    request_timeout: Duration,
) -> Option<Arc<dyn LLMBackend>> {
    let client_timeout = request_timeout + CLIENT_TIMEOUT_SLACK;
    match config {
        AIBackendConfig::Gemini { api_key, model } => match non_empty(api_key) {
            Some(key) => {
                info!("Using Gemini backend with model {}", model);
                Some(Arc::new(
                    GeminiBackend::new(key, model.clone()).with_timeout(client_timeout),
                ))
            }
            None => {
                warn!("No Gemini API key configured, AI responses will be simulated");
                None
            }
        },
        AIBackendConfig::OpenAI {
            api_key,
            model,
            base_url,
        } => match non_empty(api_key) {
            Some(key) => {
                info!("Using OpenAI backend with model {}", model);
                Some(Arc::new(
                    OpenAIBackend::with_base_url(key, model.clone(), base_url.clone())
                        .with_timeout(client_timeout),
                ))
            }
            None => {
                warn!("No OpenAI API key configured, AI responses will be simulated");
                None
            }
        },
        AIBackendConfig::Ollama { endpoint, model } => {
            info!("Using Ollama backend at {} with model {}", endpoint, model);
            Some(Arc::new(
                OllamaBackend::new(endpoint.clone(), model.clone()).with_timeout(client_timeout),
            ))
        }
        AIBackendConfig::Mock => {
            info!("Mock AI backend selected, AI responses will be simulated");
            None
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client")
}

/// Turn a non-success HTTP response into a backend error
async fn check_status(response: Response, backend: &str) -> Result<Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(BackendError::BackendError(format!(
        "{} API returned error {}: {}",
        backend, status, error_text
    )))
}

/// Google Gemini backend
///
/// Uses the `generateContent` endpoint for generation and `countTokens`
/// for prompt accounting.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCountTokensResponse {
    total_tokens: u64,
}

impl GeminiBackend {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, Self::DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
            api_key,
            model,
            base_url,
        }
    }

    /// Replace the HTTP client timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn model_url(&self, action: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            self.model,
            action
        )
    }

    fn request_for(text: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            }],
        }
    }
}

impl LLMBackend for GeminiBackend {
    fn generate<'a>(&'a self, prompt: &'a str) -> BackendFuture<'a, Completion> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.model_url("generateContent"))
                .header("x-goog-api-key", &self.api_key)
                .json(&Self::request_for(prompt))
                .send()
                .await?;
            let response = check_status(response, "Gemini").await?;

            let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
                BackendError::InvalidResponse(format!("Failed to parse Gemini response: {}", e))
            })?;

            let content = gemini_response
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| candidate.content)
                .ok_or_else(|| {
                    BackendError::InvalidResponse("No candidates in Gemini response".to_string())
                })?;

            let text: String = content.parts.into_iter().map(|part| part.text).collect();

            Ok(Completion {
                text,
                output_tokens: gemini_response
                    .usage_metadata
                    .and_then(|usage| usage.candidates_token_count),
            })
        })
    }

    fn count_tokens<'a>(&'a self, text: &'a str) -> BackendFuture<'a, u64> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.model_url("countTokens"))
                .header("x-goog-api-key", &self.api_key)
                .json(&Self::request_for(text))
                .send()
                .await?;
            let response = check_status(response, "Gemini").await?;

            let counted: GeminiCountTokensResponse = response.json().await.map_err(|e| {
                BackendError::InvalidResponse(format!("Failed to parse token count: {}", e))
            })?;
            Ok(counted.total_tokens)
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI backend for cloud-based LLM inference
///
/// Works with any endpoint speaking the Chat Completions protocol.
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl OpenAIBackend {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1".to_string())
    }

    /// Create a backend for an OpenAI-compatible API at a custom base URL
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
            api_key,
            model,
            base_url,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl LLMBackend for OpenAIBackend {
    fn generate<'a>(&'a self, prompt: &'a str) -> BackendFuture<'a, Completion> {
        Box::pin(async move {
            let request = OpenAIRequest {
                model: self.model.clone(),
                messages: vec![OpenAIMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                }],
            };

            let response = self
                .client
                .post(self.api_url())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;
            let response = check_status(response, "OpenAI").await?;

            let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
                BackendError::InvalidResponse(format!("Failed to parse OpenAI response: {}", e))
            })?;

            if let Some(error) = openai_response.error {
                return Err(BackendError::BackendError(format!(
                    "OpenAI API error ({}): {}",
                    error.error_type, error.message
                )));
            }

            let text = openai_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| {
                    BackendError::InvalidResponse("No choices in OpenAI response".to_string())
                })?
                .message
                .content
                .unwrap_or_default();

            Ok(Completion {
                text,
                output_tokens: openai_response.usage.map(|u| u.completion_tokens),
            })
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Ollama backend for local LLM inference
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Arguments
    /// * `endpoint` - Ollama server URL (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3", "mistral")
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
            endpoint,
            model,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn api_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

impl LLMBackend for OllamaBackend {
    fn generate<'a>(&'a self, prompt: &'a str) -> BackendFuture<'a, Completion> {
        Box::pin(async move {
            let request = OllamaRequest {
                model: self.model.clone(),
                prompt: prompt.to_string(),
                stream: false,
            };

            let response = self.client.post(self.api_url()).json(&request).send().await?;
            let response = check_status(response, "Ollama").await?;

            let ollama_response: OllamaResponse = response.json().await.map_err(|e| {
                BackendError::InvalidResponse(format!("Failed to parse Ollama response: {}", e))
            })?;

            if let Some(error) = ollama_response.error {
                return Err(BackendError::BackendError(format!("Ollama error: {}", error)));
            }

            Ok(Completion {
                text: ollama_response.response,
                output_tokens: ollama_response.eval_count,
            })
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Mock backend for testing and development
///
/// Returns scripted responses in order, cycling back to the first after the
/// last. Records every prompt it receives.
pub struct MockBackend {
    responses: Vec<Result<Completion, String>>,
    current_index: Mutex<usize>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Create a mock backend with a single response
    pub fn with_response(response: Result<Completion, String>) -> Self {
        Self::with_responses(vec![response])
    }

    /// Create a mock backend returning `responses` in order
    pub fn with_responses(responses: Vec<Result<Completion, String>>) -> Self {
        Self {
            responses,
            current_index: Mutex::new(0),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock backend that always answers with `text`
    pub fn success(text: &str) -> Self {
        Self::with_response(Ok(Completion::new(text)))
    }

    /// Create a mock backend that always fails
    pub fn error(error_message: &str) -> Self {
        Self::with_response(Err(error_message.to_string()))
    }

    /// Add a delay to all responses (useful for testing timeout behavior)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times generate() has been called
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Every prompt passed to generate(), oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    /// Reset call tracking and rewind the scripted responses
    pub fn reset(&self) {
        self.prompts.lock().unwrap().clear();
        *self.current_index.lock().unwrap() = 0;
    }
}

impl LLMBackend for MockBackend {
    fn generate<'a>(&'a self, prompt: &'a str) -> BackendFuture<'a, Completion> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt.to_string());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let response = {
                let mut index = self.current_index.lock().unwrap();
                if self.responses.is_empty() {
                    return Err(BackendError::BackendError(
                        "Mock backend has no scripted responses".to_string(),
                    ));
                }
                let response = self.responses[*index % self.responses.len()].clone();
                *index += 1;
                response
            };

            response.map_err(BackendError::BackendError)
        })
    }

    fn model(&self) -> &str {
        "mock"
    }
}
