use crate::ai::backends::{estimate_tokens, Completion, LLMBackend};
use crate::ai::cache::{cache_key, CacheEntry, ResponseCache};
use crate::ai::intent;
use crate::ai::rate_limiter::RateLimiter;
use crate::ai::usage::{Pricing, UsageKind, UsageLedger, UsageRecord, UsageTotals};
use crate::config::AiConfig;
use crate::error::GatewayError;
use crate::store::ObservationStore;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Returned instead of calling a model when no credentials are configured
pub const MOCK_RESPONSE: &str = "[MOCK] Model credentials missing. This is a simulated response.";

pub const CHAT_SYSTEM_CONTEXT: &str = "You are a helpful monitoring assistant.";
pub const SRE_SYSTEM_CONTEXT: &str = "You are a Site Reliability Engineer.";

/// A prompt plus the framing it should be answered under
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_context: String,
    pub kind: UsageKind,
}

impl GenerationRequest {
    pub fn chat(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_context: CHAT_SYSTEM_CONTEXT.to_string(),
            kind: UsageKind::Chat,
        }
    }

    pub fn incident_analysis(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_context: SRE_SYSTEM_CONTEXT.to_string(),
            kind: UsageKind::IncidentAnalysis,
        }
    }
}

/// Result of a gateway call
///
/// Token counts and cost are only present for fresh model responses.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub text: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl GatewayResponse {
    fn text_only(text: impl Into<String>, cached: bool) -> Self {
        Self {
            text: text.into(),
            cached,
            input_tokens: None,
            output_tokens: None,
            cost: None,
        }
    }
}

/// Tunables for [`AIGateway`]
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    /// Upper bound on every individual model call
    pub request_timeout: Duration,
    pub cache_hits_consume_quota: bool,
    /// Run the two-stage query layer for chat requests
    pub intent_queries: bool,
    pub pricing: Pricing,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&AiConfig::default())
    }
}

impl From<&AiConfig> for GatewaySettings {
    fn from(config: &AiConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            cache_hits_consume_quota: config.cache_hits_consume_quota,
            intent_queries: config.intent_queries,
            pricing: Pricing {
                input_per_million: config.input_cost_per_million,
                output_per_million: config.output_cost_per_million,
            },
        }
    }
}

/// Single entry point for every model call
///
/// Applies, in order: rate limiting, the response cache, the credential
/// check, optional two-stage generation over recorded observations, and
/// token/cost accounting.
pub struct AIGateway {
    backend: Option<Arc<dyn LLMBackend>>,
    rate_limiter: RateLimiter,
    cache: ResponseCache,
    usage: UsageLedger,
    observations: Option<Arc<ObservationStore>>,
    settings: GatewaySettings,
}

impl AIGateway {
    /// Create a gateway; a `None` backend answers every miss with [`MOCK_RESPONSE`]
    pub fn new(
        backend: Option<Arc<dyn LLMBackend>>,
        rate_limiter: RateLimiter,
        cache: ResponseCache,
        usage: UsageLedger,
    ) -> Self {
        Self {
            backend,
            rate_limiter,
            cache,
            usage,
            observations: None,
            settings: GatewaySettings::default(),
        }
    }

    /// Create a gateway with limits, pricing and timeouts from `[ai]`
    pub fn from_config(
        config: &AiConfig,
        backend: Option<Arc<dyn LLMBackend>>,
        cache: ResponseCache,
        usage: UsageLedger,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            config.rate_limit_max_calls,
            Duration::from_secs(config.rate_limit_window_seconds),
        );
        Self::new(backend, rate_limiter, cache, usage).with_settings(GatewaySettings::from(config))
    }

    /// Let chat requests query these observations
    pub fn with_observations(mut self, observations: Arc<ObservationStore>) -> Self {
        self.observations = Some(observations);
        self
    }

    pub fn with_settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether misses are answered with the mock response
    pub fn is_mock(&self) -> bool {
        self.backend.is_none()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    /// Totals over every recorded usage record
    pub fn usage_totals(&self) -> UsageTotals {
        self.usage.totals(&self.settings.pricing)
    }

    /// Answer a request, from cache when possible
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GatewayResponse, GatewayError> {
        let permit = self.rate_limiter.try_acquire().map_err(|e| {
            warn!("AI request rejected: rate limit exceeded");
            e
        })?;

        let key = cache_key(&request.prompt, &request.system_context);
        if let Some(entry) = self.cache.get(&key) {
            info!("AI cache hit");
            if self.settings.cache_hits_consume_quota {
                permit.commit();
            }
            return Ok(GatewayResponse::text_only(entry.response, true));
        }

        let backend = match &self.backend {
            Some(backend) => Arc::clone(backend),
            None => {
                debug!("No model credentials, returning mock response");
                permit.commit();
                return Ok(GatewayResponse::text_only(MOCK_RESPONSE, false));
            }
        };

        info!("Calling model {}", backend.model());
        let (completion, prompts) = self.run_generation(backend.as_ref(), request).await?;

        let input_tokens = self.count_prompt_tokens(backend.as_ref(), &prompts).await;
        let output_tokens = completion
            .output_tokens
            .unwrap_or_else(|| estimate_tokens(&completion.text));
        let cost = self.settings.pricing.cost(input_tokens, output_tokens);

        let entry = CacheEntry::new(
            key,
            &request.prompt,
            completion.text.clone(),
            input_tokens,
            output_tokens,
            Utc::now(),
        );
        if let Err(e) = self.cache.insert(entry) {
            error!("Failed to cache AI response: {}", e);
        }

        let record = UsageRecord::new(input_tokens, output_tokens, backend.model(), request.kind);
        if let Err(e) = self.usage.record(record) {
            error!("Failed to record AI usage: {}", e);
        }

        permit.commit();
        debug!(
            "AI call used {} input and {} output tokens (${})",
            input_tokens, output_tokens, cost
        );

        Ok(GatewayResponse {
            text: completion.text,
            cached: false,
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            cost: Some(cost),
        })
    }

    /// Produce the final completion, returning it with every prompt submitted
    async fn run_generation(
        &self,
        backend: &dyn LLMBackend,
        request: &GenerationRequest,
    ) -> Result<(Completion, Vec<String>), GatewayError> {
        let mut prompts = Vec::new();

        let final_prompt = match self.intent_store(request) {
            Some(store) => {
                let query_prompt = intent::query_generation_prompt(&request.prompt, Utc::now());
                let descriptor = self.complete(backend, &query_prompt).await?;
                prompts.push(query_prompt);

                match intent::parse_descriptor(&descriptor.text) {
                    Some(query) => {
                        let records = store.search(&query);
                        info!("Intent query matched {} observations", records.len());
                        if records.is_empty() {
                            intent::no_data_prompt(&request.prompt)
                        } else {
                            intent::data_prompt(&request.prompt, &records)
                        }
                    }
                    None => intent::direct_prompt(&request.system_context, &request.prompt),
                }
            }
            None => intent::direct_prompt(&request.system_context, &request.prompt),
        };

        let completion = self.complete(backend, &final_prompt).await?;
        prompts.push(final_prompt);
        Ok((completion, prompts))
    }

    fn intent_store(&self, request: &GenerationRequest) -> Option<&ObservationStore> {
        if !self.settings.intent_queries || request.kind != UsageKind::Chat {
            return None;
        }
        self.observations.as_deref()
    }

    async fn complete(&self, backend: &dyn LLMBackend, prompt: &str) -> Result<Completion, GatewayError> {
        match tokio::time::timeout(self.settings.request_timeout, backend.generate(prompt)).await {
            Ok(result) => result.map_err(|e| {
                error!("Model call failed: {}", e);
                GatewayError::from(e)
            }),
            Err(_) => {
                error!(
                    "Model call timed out after {:?}",
                    self.settings.request_timeout
                );
                Err(GatewayError::Timeout)
            }
        }
    }

    async fn count_prompt_tokens(&self, backend: &dyn LLMBackend, prompts: &[String]) -> u64 {
        let mut total = 0;
        for prompt in prompts {
            let counted =
                tokio::time::timeout(self.settings.request_timeout, backend.count_tokens(prompt)).await;
            total += match counted {
                Ok(Ok(tokens)) => tokens,
                Ok(Err(e)) => {
                    warn!("Token counting failed, falling back to estimation: {}", e);
                    estimate_tokens(prompt)
                }
                Err(_) => {
                    warn!("Token counting timed out, falling back to estimation");
                    estimate_tokens(prompt)
                }
            };
        }
        total
    }
}
