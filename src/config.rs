use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::UserContext;

const DEFAULT_PUBLISHER_URL: &str = "https://publisher.walrus-testnet.walrus.space";
const DEFAULT_AGGREGATOR_URL: &str = "https://aggregator.walrus-testnet.walrus.space";
/// One hour at 1 kHz
const MAX_WINDOW_SIZE: usize = 3_600_000;

/// Window geometry for one stream
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    /// Samples per window (W)
    pub window_size: usize,
    /// Features per sample (D)
    pub feature_dim: usize,
    /// Samples between successive classifications once the window is full
    pub hop_size: usize,
}

impl WindowConfig {
    /// Window of `seconds` at `rate_hz` packets per second
    pub fn from_duration(seconds: f64, rate_hz: f64, feature_dim: usize) -> Self {
        Self {
            window_size: (seconds * rate_hz).round().max(0.0) as usize,
            feature_dim,
            hop_size: 1,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::InvalidValue(
                "window size must be at least one sample".to_string(),
            ));
        }
        if self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::InvalidValue(format!(
                "window of {} samples exceeds the {} sample limit; check WINDOW_SECONDS and SAMPLING_RATE_HZ",
                self.window_size, MAX_WINDOW_SIZE
            )));
        }
        if self.feature_dim == 0 {
            return Err(ConfigError::InvalidValue(
                "FEATURE_DIM must be greater than zero".to_string(),
            ));
        }
        if self.hop_size == 0 {
            return Err(ConfigError::InvalidValue(
                "HOP_SIZE must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        // 2 s at 100 Hz
        Self::from_duration(2.0, 100.0, 1026)
    }
}

/// Classification worker pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum number of windows classified at once
    pub max_concurrent_pipelines: usize,
    /// Windows allowed to wait for a worker
    pub queue_capacity: usize,
    pub classifier_timeout: Duration,
    pub sink_timeout: Duration,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_pipelines == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_PIPELINES must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PIPELINE_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pipelines: 4,
            queue_capacity: 64,
            classifier_timeout: Duration::from_millis(500),
            sink_timeout: Duration::from_secs(30),
        }
    }
}

/// Blob sink settings
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub enabled: bool,
    pub publisher_url: String,
    pub aggregator_url: String,
    pub epochs: u32,
    pub network: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            publisher_url: DEFAULT_PUBLISHER_URL.to_string(),
            aggregator_url: DEFAULT_AGGREGATOR_URL.to_string(),
            epochs: 5,
            network: "testnet".to_string(),
        }
    }
}

/// Service configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    pub window: WindowConfig,
    pub pipeline: PipelineConfig,
    pub sink: SinkConfig,
    /// Classifier model file; a missing file selects mock inference
    pub model_path: PathBuf,
    /// Attached to every emergency record
    pub user_context: UserContext,
    /// Maximum live monitor connections
    pub max_subscribers: usize,
    /// Outbound messages queued per monitor before drops
    pub subscriber_buffer: usize,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let window_seconds: f64 = parse_var("WINDOW_SECONDS", 2.0)?;
        let sampling_rate: f64 = parse_var("SAMPLING_RATE_HZ", 100.0)?;
        let mut window =
            WindowConfig::from_duration(window_seconds, sampling_rate, parse_var("FEATURE_DIM", 1026)?);
        window.hop_size = parse_var("HOP_SIZE", 1)?;

        let config = Self {
            port: env::var("SENTINEL_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            bind_addr: env::var("SENTINEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            window,
            pipeline: PipelineConfig {
                max_concurrent_pipelines: parse_var("MAX_CONCURRENT_PIPELINES", 4)?,
                queue_capacity: parse_var("PIPELINE_QUEUE_CAPACITY", 64)?,
                classifier_timeout: Duration::from_millis(parse_var("CLASSIFIER_TIMEOUT_MS", 500)?),
                sink_timeout: Duration::from_secs(parse_var("SINK_TIMEOUT_SECS", 30)?),
            },
            sink: SinkConfig {
                enabled: env::var("ENABLE_SINK")
                    .map(|v| v.to_lowercase() == "true")
                    .unwrap_or(true),
                publisher_url: env::var("WALRUS_PUBLISHER_URL")
                    .unwrap_or_else(|_| DEFAULT_PUBLISHER_URL.to_string()),
                aggregator_url: env::var("WALRUS_AGGREGATOR_URL")
                    .unwrap_or_else(|_| DEFAULT_AGGREGATOR_URL.to_string()),
                epochs: parse_var("WALRUS_EPOCHS", 5)?,
                network: env::var("WALRUS_NETWORK").unwrap_or_else(|_| "testnet".to_string()),
            },
            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/model.json")),
            user_context: UserContext {
                subject_id: env::var("SUBJECT_ID").unwrap_or_else(|_| "default-subject".to_string()),
                location: env::var("SUBJECT_LOCATION").ok(),
            },
            max_subscribers: parse_var("MAX_SUBSCRIBERS", 1000)?,
            subscriber_buffer: parse_var("SUBSCRIBER_BUFFER", 64)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.pipeline.validate()?;
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SUBSCRIBER_BUFFER must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_addr: "0.0.0.0".to_string(),
            window: WindowConfig::default(),
            pipeline: PipelineConfig::default(),
            sink: SinkConfig::default(),
            model_path: PathBuf::from("models/model.json"),
            user_context: UserContext::default(),
            max_subscribers: 1000,
            subscriber_buffer: 64,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
