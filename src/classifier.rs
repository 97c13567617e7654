use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::traits::{Classifier, SentinelError, SentinelResult};
use crate::types::{ActivityLabel, Prediction};

/// Stand-in used when no trained model is available.
///
/// Draws Normal 80% of the time, Fall and Stillness 10% each.
pub struct MockClassifier {
    rng: Mutex<StdRng>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic draws for tests and demos
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn infer(&self, _features: &[f32]) -> SentinelResult<Prediction> {
        let mut rng = self.rng.lock();
        let roll: f64 = rng.gen();
        let label = if roll < 0.8 {
            ActivityLabel::Normal
        } else if roll < 0.9 {
            ActivityLabel::Fall
        } else {
            ActivityLabel::Stillness
        };
        let confidence = rng.gen_range(0.7..0.99);
        Ok(Prediction::new(label, confidence))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug, Deserialize)]
struct CentroidModel {
    labels: Vec<String>,
    centroids: Vec<Vec<f32>>,
}

/// Nearest-centroid model over window-mean feature vectors
#[derive(Debug)]
pub struct CentroidClassifier {
    labels: Vec<ActivityLabel>,
    centroids: Vec<Vec<f32>>,
    feature_dim: usize,
}

impl CentroidClassifier {
    pub fn new(labels: Vec<ActivityLabel>, centroids: Vec<Vec<f32>>) -> SentinelResult<Self> {
        if labels.is_empty() || labels.len() != centroids.len() {
            return Err(SentinelError::ModelLoad(format!(
                "expected one centroid per label, got {} labels and {} centroids",
                labels.len(),
                centroids.len()
            )));
        }
        let feature_dim = centroids[0].len();
        if feature_dim == 0 || centroids.iter().any(|c| c.len() != feature_dim) {
            return Err(SentinelError::ModelLoad(
                "centroids must share a non-zero dimension".to_string(),
            ));
        }
        Ok(Self {
            labels,
            centroids,
            feature_dim,
        })
    }

    /// Load a JSON model of the form `{"labels": [..], "centroids": [[..], ..]}`
    pub fn from_file(path: &Path) -> SentinelResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let model: CentroidModel = serde_json::from_str(&raw)?;
        Self::new(
            model.labels.into_iter().map(ActivityLabel::from).collect(),
            model.centroids,
        )
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

#[async_trait]
impl Classifier for CentroidClassifier {
    async fn infer(&self, features: &[f32]) -> SentinelResult<Prediction> {
        if features.len() != self.feature_dim {
            return Err(SentinelError::Classifier(format!(
                "model expects {} features, got {}",
                self.feature_dim,
                features.len()
            )));
        }

        let distances: Vec<f64> = self
            .centroids
            .iter()
            .map(|centroid| {
                centroid
                    .iter()
                    .zip(features)
                    .map(|(c, x)| {
                        let d = f64::from(*c) - f64::from(*x);
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();

        let (best, best_distance) = distances
            .iter()
            .copied()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| SentinelError::Classifier("model has no centroids".to_string()))?;

        let confidence = if best_distance == 0.0 {
            1.0
        } else {
            let total: f64 = distances.iter().map(|d| 1.0 / d.max(f64::EPSILON)).sum();
            (1.0 / best_distance) / total
        };

        Ok(Prediction::new(self.labels[best].clone(), confidence))
    }

    fn name(&self) -> &str {
        "centroid"
    }
}

/// Load the model at `path`, falling back to mock inference when it is absent or unusable
pub fn load_classifier(path: &Path) -> Arc<dyn Classifier> {
    if !path.exists() {
        warn!(
            "Model file {} not found. Using mock inference.",
            path.display()
        );
        return Arc::new(MockClassifier::new());
    }

    match CentroidClassifier::from_file(path) {
        Ok(model) => {
            info!(
                "Model loaded successfully from {} ({} features)",
                path.display(),
                model.feature_dim()
            );
            Arc::new(model)
        }
        Err(e) => {
            error!("Error loading model from {}: {}", path.display(), e);
            Arc::new(MockClassifier::new())
        }
    }
}
