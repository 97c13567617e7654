use crate::traits::{SentinelError, SentinelResult};
use crate::types::{Sample, Window};

/// Turns a window of samples into the single vector the classifier expects
#[derive(Debug, Clone)]
pub struct WindowPreprocessor {
    feature_dim: usize,
}

impl WindowPreprocessor {
    pub fn new(feature_dim: usize) -> Self {
        Self { feature_dim }
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Element-wise mean over the time axis of a (W x D) window
    pub fn reduce(&self, window: &Window) -> SentinelResult<Vec<f32>> {
        if window.is_empty() {
            return Err(SentinelError::EmptyWindow);
        }

        let mut sums = vec![0.0f64; self.feature_dim];
        for sample in window.samples() {
            if sample.dimension() != self.feature_dim {
                return Err(SentinelError::DimensionMismatch {
                    expected: self.feature_dim,
                    actual: sample.dimension(),
                });
            }
            for (acc, value) in sums.iter_mut().zip(sample.features()) {
                *acc += f64::from(*value);
            }
        }

        let count = window.len() as f64;
        Ok(sums.into_iter().map(|s| (s / count) as f32).collect())
    }

    /// Mean absolute magnitude of a single packet
    pub fn summarize(sample: &Sample) -> f64 {
        let features = sample.features();
        if features.is_empty() {
            return 0.0;
        }
        let total: f64 = features.iter().map(|v| f64::from(v.abs())).sum();
        total / features.len() as f64
    }
}
