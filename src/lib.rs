/// Error types for the API monitor
pub mod error;

/// Observation and incident records
pub mod events;

/// Injectable time source
pub mod clock;

/// Configuration management
pub mod config;

/// HTTP probe of the monitored endpoint
pub mod probe;

/// Observation and incident persistence
pub mod store;

/// Fan-out of new observations to live subscribers
pub mod broadcast;

/// Threshold rules that turn observations into incidents
pub mod detection;

/// AI gateway, incident analysis and LLM backend implementations
pub mod ai;

/// Periodic and manual probe cycles
pub mod scheduler;

/// HTTP query, stream and AI interface
pub mod api;

// Re-export commonly used types
pub use error::{AnalysisError, BackendError, ConfigError, GatewayError, StoreError};
pub use events::{Incident, Observation};
