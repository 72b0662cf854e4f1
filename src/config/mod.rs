/// Configuration management
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    AIBackendConfig, AiConfig, Config, DetectionConfig, ProbeConfig, SchedulerConfig,
    ServerConfig, StorageConfig,
};
