use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::SlidingWindowBuffer;
use crate::config::{PipelineConfig, WindowConfig};
use crate::hub::BroadcastHub;
use crate::pipeline::{ClassificationPipeline, PipelineContext, PipelinePool, PoolStats, WindowJob};
use crate::preprocess::WindowPreprocessor;
use crate::traits::{SentinelError, SentinelResult};
use crate::types::{ActivityLabel, MonitorMessage, Sample, StreamState};

/// What happened to one ingested sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Window still filling; partial feedback broadcast
    Buffering { filled: usize, capacity: usize },
    /// Window handed to the classification pool
    Dispatched { sequence: u64 },
    /// Window full but this sample falls between hops
    Skipped { sequence: u64 },
    /// Classification queue full; window dropped
    Throttled { sequence: u64 },
}

/// Running ingestion counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub samples_ingested: u64,
    pub windows_dispatched: u64,
    pub windows_skipped: u64,
    pub windows_rejected: u64,
}

#[derive(Default)]
struct Counters {
    ingested: AtomicU64,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
}

/// Entry point for one sensor stream
pub struct IngestionCoordinator {
    window: WindowConfig,
    buffer: SlidingWindowBuffer,
    hub: BroadcastHub,
    pool: PipelinePool,
    counters: Counters,
}

impl IngestionCoordinator {
    /// Wire a stream to its collaborators. Must be called from within a Tokio runtime.
    pub fn new(
        window: WindowConfig,
        pipeline: PipelineConfig,
        context: PipelineContext,
    ) -> SentinelResult<Self> {
        window.validate()?;
        pipeline.validate()?;

        let hub = context.hub.clone();
        let runner = Arc::new(ClassificationPipeline::new(
            WindowPreprocessor::new(window.feature_dim),
            context,
            &pipeline,
        ));
        let pool = PipelinePool::new(&pipeline, runner);

        info!(
            "Stream ready: window={} samples, dim={}, hop={}, workers={}",
            window.window_size, window.feature_dim, window.hop_size, pipeline.max_concurrent_pipelines
        );

        Ok(Self {
            buffer: SlidingWindowBuffer::new(window.window_size),
            window,
            hub,
            pool,
            counters: Counters::default(),
        })
    }

    /// Reject samples that would poison the window
    pub fn validate_features(&self, features: &[f32]) -> SentinelResult<()> {
        if features.is_empty() {
            return Err(SentinelError::EmptySample);
        }
        if features.len() != self.window.feature_dim {
            return Err(SentinelError::DimensionMismatch {
                expected: self.window.feature_dim,
                actual: features.len(),
            });
        }
        if let Some(index) = features.iter().position(|v| !v.is_finite()) {
            return Err(SentinelError::NonFiniteFeature { index });
        }
        Ok(())
    }

    /// Accept one packet. Safe to call concurrently; never waits on classification.
    pub fn ingest(&self, features: Vec<f32>) -> SentinelResult<IngestOutcome> {
        self.validate_features(&features)?;

        // The buffer holds magnitudes, not signed CSI values
        let sample = Arc::new(Sample::new(features.into_iter().map(f32::abs).collect()));
        let magnitude = WindowPreprocessor::summarize(&sample);
        let (receipt, window) = self
            .buffer
            .push_and_snapshot(sample, |sequence| self.is_trigger(sequence));
        self.counters.ingested.fetch_add(1, Ordering::Relaxed);

        if receipt.len < self.buffer.capacity() {
            self.hub
                .broadcast(&MonitorMessage::feedback(magnitude, ActivityLabel::Buffering));
            return Ok(IngestOutcome::Buffering {
                filled: receipt.len,
                capacity: self.buffer.capacity(),
            });
        }

        let sequence = receipt.sequence;
        let Some(window) = window else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            self.hub
                .broadcast(&MonitorMessage::feedback(magnitude, ActivityLabel::Pending));
            return Ok(IngestOutcome::Skipped { sequence });
        };

        match self.pool.try_submit(WindowJob {
            window,
            magnitude,
            sequence,
        }) {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!("Window {} dispatched", sequence);
                Ok(IngestOutcome::Dispatched { sequence })
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping window {}: {}", sequence, e);
                self.hub
                    .broadcast(&MonitorMessage::feedback(magnitude, ActivityLabel::Pending));
                Ok(IngestOutcome::Throttled { sequence })
            }
        }
    }

    /// Whether the sample with this arrival index starts a classification
    fn is_trigger(&self, sequence: u64) -> bool {
        let window = self.window.window_size as u64;
        sequence >= window && (sequence - window) % self.window.hop_size as u64 == 0
    }

    pub fn state(&self) -> StreamState {
        if self.buffer.is_full() {
            StreamState::Ready
        } else {
            StreamState::Buffering
        }
    }

    pub fn window_config(&self) -> &WindowConfig {
        &self.window
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            samples_ingested: self.counters.ingested.load(Ordering::Relaxed),
            windows_dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            windows_skipped: self.counters.skipped.load(Ordering::Relaxed),
            windows_rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::EmergencyHistory;
    use crate::hub::Subscription;
    use crate::sink::DisabledSink;
    use crate::traits::Classifier;
    use crate::types::{Prediction, UserContext};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct ConstantClassifier;

    #[async_trait]
    impl Classifier for ConstantClassifier {
        async fn infer(&self, _features: &[f32]) -> SentinelResult<Prediction> {
            Ok(Prediction::new(ActivityLabel::Normal, 0.9))
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    fn coordinator(
        window_size: usize,
        feature_dim: usize,
        hop_size: usize,
    ) -> (IngestionCoordinator, BroadcastHub) {
        let hub = BroadcastHub::new();
        let context = PipelineContext {
            classifier: Arc::new(ConstantClassifier),
            sink: Arc::new(DisabledSink),
            hub: hub.clone(),
            history: EmergencyHistory::new(),
            user_context: UserContext::default(),
        };
        let window = WindowConfig {
            window_size,
            feature_dim,
            hop_size,
        };
        (
            IngestionCoordinator::new(window, PipelineConfig::default(), context).unwrap(),
            hub,
        )
    }

    async fn next_message(sub: &mut Subscription) -> Value {
        let payload = tokio::time::timeout(Duration::from_secs(2), sub.receiver.recv())
            .await
            .expect("no message within deadline")
            .expect("hub closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_buffering_then_classification() {
        let (coordinator, hub) = coordinator(3, 2, 1);
        let mut sub = hub.connect().unwrap();

        assert_eq!(coordinator.state(), StreamState::Buffering);
        assert_eq!(
            coordinator.ingest(vec![1.0, 1.0]).unwrap(),
            IngestOutcome::Buffering { filled: 1, capacity: 3 }
        );
        assert_eq!(
            coordinator.ingest(vec![2.0, 2.0]).unwrap(),
            IngestOutcome::Buffering { filled: 2, capacity: 3 }
        );
        for _ in 0..2 {
            let msg = next_message(&mut sub).await;
            assert_eq!(msg["prediction"], "Buffering");
            assert_eq!(msg["confidence"], 0.0);
            assert_eq!(msg["is_emergency"], false);
        }

        assert_eq!(
            coordinator.ingest(vec![3.0, 3.0]).unwrap(),
            IngestOutcome::Dispatched { sequence: 3 }
        );
        assert_eq!(coordinator.state(), StreamState::Ready);

        let msg = next_message(&mut sub).await;
        assert_eq!(msg["prediction"], "Normal");
        assert_eq!(msg["magnitude"], 3.0);
    }

    #[tokio::test]
    async fn test_every_sample_after_warmup_triggers_with_unit_hop() {
        let (coordinator, _hub) = coordinator(2, 1, 1);
        coordinator.ingest(vec![1.0]).unwrap();
        for expected in 2..=5 {
            assert_eq!(
                coordinator.ingest(vec![1.0]).unwrap(),
                IngestOutcome::Dispatched { sequence: expected }
            );
        }
        assert_eq!(coordinator.stats().windows_dispatched, 4);
    }

    #[tokio::test]
    async fn test_hop_size_strides_classification() {
        let (coordinator, hub) = coordinator(3, 1, 2);
        let mut sub = hub.connect().unwrap();

        let outcomes: Vec<_> = (0..6)
            .map(|i| coordinator.ingest(vec![i as f32]).unwrap())
            .collect();
        assert_eq!(outcomes[2], IngestOutcome::Dispatched { sequence: 3 });
        assert_eq!(outcomes[3], IngestOutcome::Skipped { sequence: 4 });
        assert_eq!(outcomes[4], IngestOutcome::Dispatched { sequence: 5 });
        assert_eq!(outcomes[5], IngestOutcome::Skipped { sequence: 6 });

        let stats = coordinator.stats();
        assert_eq!(stats.samples_ingested, 6);
        assert_eq!(stats.windows_dispatched, 2);
        assert_eq!(stats.windows_skipped, 2);

        // One message per sample
        let mut labels = Vec::new();
        for _ in 0..6 {
            labels.push(next_message(&mut sub).await["prediction"].as_str().unwrap().to_string());
        }
        assert_eq!(labels.iter().filter(|l| *l == "Buffering").count(), 2);
        assert_eq!(labels.iter().filter(|l| *l == "Pending").count(), 2);
        assert_eq!(labels.iter().filter(|l| *l == "Normal").count(), 2);
    }

    #[tokio::test]
    async fn test_contract_violations_never_reach_buffer() {
        let (coordinator, _hub) = coordinator(3, 2, 1);

        assert!(matches!(
            coordinator.ingest(vec![1.0]),
            Err(SentinelError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            coordinator.ingest(vec![]),
            Err(SentinelError::EmptySample)
        ));
        assert!(matches!(
            coordinator.ingest(vec![1.0, f32::NAN]),
            Err(SentinelError::NonFiniteFeature { index: 1 })
        ));
        assert_eq!(coordinator.buffered(), 0);
        assert_eq!(coordinator.stats().samples_ingested, 0);
    }

    #[tokio::test]
    async fn test_feedback_magnitude_uses_absolute_values() {
        let (coordinator, hub) = coordinator(4, 2, 1);
        let mut sub = hub.connect().unwrap();

        coordinator.ingest(vec![-1.0, -3.0]).unwrap();
        assert_eq!(next_message(&mut sub).await["magnitude"], 2.0);
    }

    #[test]
    fn test_invalid_window_config_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let context = PipelineContext {
            classifier: Arc::new(ConstantClassifier),
            sink: Arc::new(DisabledSink),
            hub: BroadcastHub::new(),
            history: EmergencyHistory::new(),
            user_context: UserContext::default(),
        };
        let window = WindowConfig {
            window_size: 0,
            feature_dim: 1,
            hop_size: 1,
        };
        assert!(matches!(
            IngestionCoordinator::new(window, PipelineConfig::default(), context),
            Err(SentinelError::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_concurrent_producers() {
        let (coordinator, _hub) = coordinator(3, 1, 1);
        let coordinator = Arc::new(coordinator);

        let handles: Vec<_> = (1..=3)
            .map(|v| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ingest(vec![v as f32]).unwrap() })
            })
            .collect();
        let mut dispatched = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), IngestOutcome::Dispatched { .. }) {
                dispatched += 1;
            }
        }

        assert_eq!(dispatched, 1);
        assert_eq!(coordinator.buffered(), 3);
        assert_eq!(coordinator.stats().samples_ingested, 3);
    }
}
