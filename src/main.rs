use anyhow::Context;
use apiwatch::ai::{self, AIGateway, IncidentAnalyzer, ResponseCache, UsageLedger};
use apiwatch::api::{self, AppState};
use apiwatch::broadcast::Broadcaster;
use apiwatch::config::Config;
use apiwatch::detection::AnomalyDetector;
use apiwatch::error::{ConfigError, StoreError};
use apiwatch::probe::{Probe, ProbeClient};
use apiwatch::scheduler::Scheduler;
use apiwatch::store::{IncidentStore, ObservationStore};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Command-line arguments for the API monitor
#[derive(Parser)]
#[command(
    name = "apiwatch",
    about = "API health monitor - periodic probing, incident detection and AI analysis",
    long_about = "Probes an HTTP endpoint on a schedule, records every observation, opens \
                  incidents on slow or failing responses and asks an LLM for a root cause. \
                  Observations, statistics and a live event stream are served over HTTP."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Override the HTTP bind address
    #[arg(short, long, value_name = "ADDR", help = "Address to serve the API on, e.g. 127.0.0.1:3000")]
    bind: Option<String>,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in ApiMonitor::load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(ref bind) = self.bind {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                return Err(format!("Invalid bind address: {}", bind));
            }
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Wires the probe, stores, detector, AI gateway and HTTP API together
///
/// ApiMonitor owns the lifecycle: the scheduler loop and the HTTP server run
/// until a shutdown signal arrives, then both are stopped.
pub struct ApiMonitor {
    config: Config,
    state: AppState,
    shutdown_sender: watch::Sender<bool>,
    shutdown_receiver: watch::Receiver<bool>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl ApiMonitor {
    /// Build every component from configuration
    ///
    /// With `[storage] data_dir` set, observations, incidents, cache entries
    /// and usage records are journaled there and replayed on start.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a journal cannot be opened or replayed.
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let cache_ttl = Duration::from_secs(config.ai.cache_ttl_seconds);

        let (observations, incidents, cache, usage) = match &config.storage.data_dir {
            Some(dir) => {
                info!("Journaling records to {}", dir.display());
                (
                    ObservationStore::open(dir)?,
                    IncidentStore::open(dir)?,
                    ResponseCache::open(dir, cache_ttl)?,
                    UsageLedger::open(dir)?,
                )
            }
            None => {
                info!("No data directory configured, records are kept in memory only");
                (
                    ObservationStore::new(),
                    IncidentStore::new(),
                    ResponseCache::new(cache_ttl),
                    UsageLedger::new(),
                )
            }
        };
        let observations = Arc::new(observations);
        let incidents = Arc::new(incidents);

        let backend = ai::backends::from_config(
            &config.ai.backend,
            Duration::from_secs(config.ai.request_timeout_seconds),
        );
        match &backend {
            Some(backend) => info!("Using AI model: {}", backend.model()),
            None => warn!("No model credentials configured, AI responses will be simulated"),
        }

        let gateway = Arc::new(
            AIGateway::from_config(&config.ai, backend, cache, usage)
                .with_observations(Arc::clone(&observations)),
        );

        let analyzer = Arc::new(IncidentAnalyzer::new(
            Arc::clone(&gateway),
            Arc::clone(&incidents),
        ));
        let detector = Arc::new(
            AnomalyDetector::from_config(
                &config.detection,
                config.probe.endpoint_label(),
                Arc::clone(&incidents),
            )
            .with_analyzer(analyzer),
        );

        let probe: Arc<dyn Probe> = Arc::new(ProbeClient::from_config(&config.probe));
        let broadcaster = Broadcaster::new();
        let scheduler = Arc::new(Scheduler::new(
            probe,
            Arc::clone(&observations),
            broadcaster.clone(),
            detector,
            Duration::from_secs(config.scheduler.interval_seconds),
        ));

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        Ok(Self {
            config,
            state: AppState {
                scheduler,
                observations,
                incidents,
                broadcaster,
                gateway,
            },
            shutdown_sender,
            shutdown_receiver,
            scheduler_handle: None,
        })
    }

    /// Load configuration from file or use defaults
    ///
    /// A missing, unreadable or invalid file is reported and replaced by the
    /// default configuration. API keys absent from the file are read from
    /// the environment.
    pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let mut config = match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                match Config::from_file(std::path::Path::new(path)) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(_)) => {
                        warn!(
                            "Configuration file '{}' not found or unreadable, using defaults",
                            path
                        );
                        Config::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path, e);
                        warn!("Using default configuration due to invalid config file");
                        Config::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Handle used by the signal handler to request shutdown
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_sender.clone()
    }

    /// Start the periodic probe loop
    pub fn start(&mut self) {
        let handle = Arc::clone(&self.state.scheduler).start(self.shutdown_receiver.clone());
        self.scheduler_handle = Some(handle);
    }

    /// Serve the HTTP API until shutdown is requested
    pub async fn serve(&self) -> anyhow::Result<()> {
        let bind = &self.config.server.bind;
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", bind))?;
        info!("Serving API on http://{}/api", bind);

        let mut shutdown = self.shutdown_receiver.clone();
        axum::serve(listener, api::create_router(self.state.clone()))
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .context("HTTP server failed")?;
        Ok(())
    }

    /// Stop the probe loop and wait for it to exit
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        info!("Stopping API monitor...");
        // Receivers may already be gone if the server exited on its own
        let _ = self.shutdown_sender.send(true);

        if let Some(handle) = self.scheduler_handle.take() {
            handle.await.context("Scheduler task panicked")?;
        }

        info!("API monitor stopped");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting API monitor");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = match ApiMonitor::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let mut monitor = match ApiMonitor::new(config) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Failed to initialize ApiMonitor: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown_sender = monitor.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .expect("Error setting SIGINT handler for graceful shutdown");

    monitor.start();
    info!("API monitor is running. Press Ctrl+C to stop.");

    let served = monitor.serve().await;

    if let Err(e) = monitor.stop().await {
        error!("Error during shutdown: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = served {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("API monitor shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile, TempDir};

    fn toml_file() -> NamedTempFile {
        Builder::new().suffix(".toml").tempfile().unwrap()
    }

    fn cli(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            bind: None,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let mut file = toml_file();
        writeln!(file, "[ai.backend]\ntype = \"mock\"").unwrap();

        assert!(cli(Some(file.path().to_path_buf())).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        // Missing files are handled by falling back to defaults
        assert!(cli(Some(PathBuf::from("/nonexistent/config.toml"))).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = TempDir::new().unwrap();
        assert!(cli(Some(dir.path().to_path_buf())).validate().is_err());
    }

    #[test]
    fn test_cli_validation_no_config() {
        assert!(cli(None).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_bind_address() {
        let mut args = cli(None);
        args.bind = Some("127.0.0.1:8080".to_string());
        assert!(args.validate().is_ok());

        args.bind = Some("localhost".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_config_path_str_with_valid_path() {
        let args = cli(Some(PathBuf::from("config.toml")));
        assert_eq!(args.config_path_str().unwrap(), Some("config.toml"));
    }

    #[test]
    fn test_config_path_str_no_config() {
        assert_eq!(cli(None).config_path_str().unwrap(), None);
    }

    #[test]
    fn test_load_config_falls_back_to_defaults() {
        let missing = ApiMonitor::load_config(Some("/nonexistent/config.toml")).unwrap();
        assert_eq!(missing.scheduler, Config::default().scheduler);

        let mut invalid = toml_file();
        writeln!(invalid, "[scheduler]\ninterval_seconds = \"often\"").unwrap();
        let fallback = ApiMonitor::load_config(invalid.path().to_str()).unwrap();
        assert_eq!(fallback.scheduler, Config::default().scheduler);
    }

    #[tokio::test]
    async fn test_monitor_with_journals_restores_records() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());
        config.ai.backend = apiwatch::config::AIBackendConfig::Mock;

        let monitor = ApiMonitor::new(config.clone()).unwrap();
        assert!(monitor.state.gateway.is_mock());
        monitor
            .state
            .observations
            .append(apiwatch::Observation::new(
                200,
                12.5,
                serde_json::Value::Null,
                serde_json::Value::Null,
                "POST",
                apiwatch::events::ProbeOrigin::Manual,
            ))
            .unwrap();
        drop(monitor);

        let reopened = ApiMonitor::new(config).unwrap();
        assert_eq!(reopened.state.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut config = Config::default();
        config.ai.backend = apiwatch::config::AIBackendConfig::Mock;
        config.scheduler.interval_seconds = 3600;

        let mut monitor = ApiMonitor::new(config).unwrap();
        monitor.start();
        assert!(monitor.stop().await.is_ok());
        assert!(monitor.scheduler_handle.is_none());
    }
}
