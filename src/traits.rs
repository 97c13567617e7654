use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConfigError;
use crate::types::Prediction;

/// Result type for sentinel operations
pub type SentinelResult<T> = Result<T, SentinelError>;

/// Errors that can occur in the ingestion core and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample has no features")]
    EmptySample,

    #[error("Non-finite feature value at index {index}")]
    NonFiniteFeature { index: usize },

    #[error("Window has no samples")]
    EmptyWindow,

    #[error("Pipeline queue is full")]
    QueueFull,

    #[error("Pipeline queue is closed")]
    QueueClosed,

    #[error("Broadcast hub at capacity ({0} subscribers)")]
    HubAtCapacity(usize),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SentinelError {
    /// Whether the error is a malformed sample that must be rejected at ingest
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SentinelError::DimensionMismatch { .. }
                | SentinelError::EmptySample
                | SentinelError::NonFiniteFeature { .. }
        )
    }
}

/// Maps a reduced feature vector to an activity label
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one window-level feature vector
    async fn infer(&self, features: &[f32]) -> SentinelResult<Prediction>;

    /// Short name for logs and health output
    fn name(&self) -> &str;
}

/// Durable store for emergency records
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish a record, returning its external identifier on success
    async fn publish(&self, record: Value, kind: &str) -> Option<String>;

    /// Fetch a previously published record
    async fn retrieve(&self, external_id: &str) -> Option<Value>;
}
