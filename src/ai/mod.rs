/// AI gateway, incident analysis and LLM backend implementations
pub mod analyzer;
pub mod backends;
pub mod cache;
pub mod gateway;
pub mod intent;
pub mod json;
pub mod rate_limiter;
pub mod usage;

pub use analyzer::{AnalysisOutcome, IncidentAnalyzer};
pub use backends::{
    Completion, GeminiBackend, LLMBackend, MockBackend, OllamaBackend, OpenAIBackend,
};
pub use cache::{CacheEntry, ResponseCache};
pub use gateway::{AIGateway, GatewayResponse, GatewaySettings, GenerationRequest, MOCK_RESPONSE};
pub use rate_limiter::{RateLimiter, RatePermit};
pub use usage::{Pricing, UsageKind, UsageLedger, UsageRecord, UsageTotals};
