use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One CSI packet reduced to per-subcarrier magnitudes
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    features: Vec<f32>,
    received_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(features: Vec<f32>) -> Self {
        Self::with_timestamp(features, Utc::now())
    }

    pub fn with_timestamp(features: Vec<f32>, received_at: DateTime<Utc>) -> Self {
        Self {
            features,
            received_at,
        }
    }

    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn dimension(&self) -> usize {
        self.features.len()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Point-in-time copy of a full buffer, oldest sample first.
///
/// Samples are shared immutable values, so later buffer mutation never
/// shows through a window that has already been taken.
#[derive(Debug, Clone)]
pub struct Window {
    samples: Vec<Arc<Sample>>,
}

impl Window {
    pub(crate) fn new(samples: Vec<Arc<Sample>>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().map(|s| s.as_ref())
    }

    /// Timestamp of the newest sample
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|s| s.received_at())
    }
}

/// Activity class reported to monitors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityLabel {
    Normal,
    Stillness,
    Fall,
    /// Window not yet full
    Buffering,
    /// Window full but this packet did not trigger a classification
    Pending,
    Other(String),
}

impl ActivityLabel {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityLabel::Normal => "Normal",
            ActivityLabel::Stillness => "Stillness",
            ActivityLabel::Fall => "Fall",
            ActivityLabel::Buffering => "Buffering",
            ActivityLabel::Pending => "Pending",
            ActivityLabel::Other(s) => s,
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, ActivityLabel::Fall | ActivityLabel::Stillness)
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            ActivityLabel::Fall => Some(Severity::Critical),
            ActivityLabel::Stillness => Some(Severity::High),
            _ => None,
        }
    }
}

impl From<&str> for ActivityLabel {
    fn from(value: &str) -> Self {
        // The training dataset labels are Turkish
        match value.trim() {
            "Normal" | "normal" => ActivityLabel::Normal,
            "Stillness" | "stillness" | "Hareketsizlik" => ActivityLabel::Stillness,
            "Fall" | "fall" | "Düşme" => ActivityLabel::Fall,
            "Buffering" | "Buffering..." => ActivityLabel::Buffering,
            "Pending" => ActivityLabel::Pending,
            other => ActivityLabel::Other(other.to_string()),
        }
    }
}

impl From<String> for ActivityLabel {
    fn from(value: String) -> Self {
        ActivityLabel::from(value.as_str())
    }
}

impl From<ActivityLabel> for String {
    fn from(label: ActivityLabel) -> Self {
        match label {
            ActivityLabel::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an emergency history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
}

/// Raw classifier output
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: ActivityLabel,
    pub confidence: f64,
}

impl Prediction {
    pub fn new(label: impl Into<ActivityLabel>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// Result used when the classifier fails or times out
    pub fn fallback() -> Self {
        Self::new(ActivityLabel::Normal, 0.0)
    }
}

/// Outcome of classifying one completed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: ActivityLabel,
    pub confidence: f64,
    pub magnitude: f64,
    pub is_emergency: bool,
    pub timestamp: DateTime<Utc>,
}

impl ClassificationResult {
    pub fn new(prediction: Prediction, magnitude: f64) -> Self {
        let confidence = if prediction.confidence.is_finite() {
            prediction.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            is_emergency: prediction.label.is_emergency(),
            label: prediction.label,
            confidence,
            magnitude,
            timestamp: Utc::now(),
        }
    }
}

/// JSON message pushed to every monitor subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorMessage {
    pub magnitude: f64,
    pub prediction: ActivityLabel,
    pub confidence: f64,
    pub is_emergency: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
}

impl MonitorMessage {
    /// Immediate per-packet feedback carrying no classification
    pub fn feedback(magnitude: f64, label: ActivityLabel) -> Self {
        Self {
            magnitude,
            prediction: label,
            confidence: 0.0,
            is_emergency: false,
            timestamp: Utc::now(),
            blob_id: None,
        }
    }

    pub fn from_result(result: &ClassificationResult, blob_id: Option<String>) -> Self {
        Self {
            magnitude: result.magnitude,
            prediction: result.label.clone(),
            confidence: result.confidence,
            is_emergency: result.is_emergency,
            timestamp: result.timestamp,
            blob_id,
        }
    }
}

/// Who the monitored stream belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            subject_id: "default-subject".to_string(),
            location: None,
        }
    }
}

/// Record handed to the blob sink for an emergency window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub result: ClassificationResult,
    pub user_context: UserContext,
    pub external_blob_id: Option<String>,
}

/// Compact local trace of a published emergency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyHistoryEntry {
    pub time: DateTime<Utc>,
    pub label: ActivityLabel,
    pub severity: Severity,
    pub external_id: String,
}

/// Per-stream warm-up state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Buffering,
    Ready,
}
