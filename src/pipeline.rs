use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::history::EmergencyHistory;
use crate::hub::BroadcastHub;
use crate::preprocess::WindowPreprocessor;
use crate::traits::{Classifier, PublishSink, SentinelError, SentinelResult};
use crate::types::{
    ClassificationResult, EmergencyHistoryEntry, EmergencyRecord, MonitorMessage, Prediction,
    UserContext, Window,
};

/// Record kind used for emergency blobs
const EMERGENCY_KIND: &str = "event";

/// One completed window waiting for classification
#[derive(Debug, Clone)]
pub struct WindowJob {
    pub window: Window,
    /// Magnitude of the packet that completed the window
    pub magnitude: f64,
    /// Arrival index of that packet
    pub sequence: u64,
}

/// Collaborators shared by every pipeline run
#[derive(Clone)]
pub struct PipelineContext {
    pub classifier: Arc<dyn Classifier>,
    pub sink: Arc<dyn PublishSink>,
    pub hub: BroadcastHub,
    pub history: EmergencyHistory,
    pub user_context: UserContext,
}

/// window -> reduce -> classify -> publish -> broadcast
pub struct ClassificationPipeline {
    preprocessor: WindowPreprocessor,
    context: PipelineContext,
    classifier_timeout: Duration,
    sink_timeout: Duration,
}

impl ClassificationPipeline {
    pub fn new(
        preprocessor: WindowPreprocessor,
        context: PipelineContext,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            preprocessor,
            context,
            classifier_timeout: config.classifier_timeout,
            sink_timeout: config.sink_timeout,
        }
    }

    /// Classify a window and broadcast the outcome; always yields a message
    pub async fn run(&self, job: WindowJob) -> MonitorMessage {
        let prediction = self.classify(&job.window).await;
        let mut result = ClassificationResult::new(prediction, job.magnitude);
        // Stamp with capture time so out-of-order completions stay orderable
        if let Some(captured_at) = job.window.captured_at() {
            result.timestamp = captured_at;
        }

        let blob_id = if result.is_emergency {
            self.record_emergency(&result).await
        } else {
            None
        };

        let message = MonitorMessage::from_result(&result, blob_id);
        let report = self.context.hub.broadcast(&message);
        debug!(
            "Window {} classified as {} ({:.2}), delivered to {}",
            job.sequence, message.prediction, message.confidence, report.delivered
        );
        message
    }

    async fn classify(&self, window: &Window) -> Prediction {
        let features = match self.preprocessor.reduce(window) {
            Ok(features) => features,
            Err(e) => {
                error!("Window preprocessing failed: {}", e);
                return Prediction::fallback();
            }
        };

        match timeout(self.classifier_timeout, self.context.classifier.infer(&features)).await {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(e)) => {
                warn!("Inference error: {}", e);
                Prediction::fallback()
            }
            Err(_) => {
                warn!(
                    "Classifier {} timed out after {:?}",
                    self.context.classifier.name(),
                    self.classifier_timeout
                );
                Prediction::fallback()
            }
        }
    }

    async fn record_emergency(&self, result: &ClassificationResult) -> Option<String> {
        let record = EmergencyRecord {
            result: result.clone(),
            user_context: self.context.user_context.clone(),
            external_blob_id: None,
        };
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize emergency record: {}", e);
                return None;
            }
        };

        let blob_id = match timeout(
            self.sink_timeout,
            self.context.sink.publish(value, EMERGENCY_KIND),
        )
        .await
        {
            Ok(blob_id) => blob_id,
            Err(_) => {
                warn!("Emergency publish timed out after {:?}", self.sink_timeout);
                None
            }
        };

        let Some(blob_id) = blob_id else {
            warn!(
                "{} emergency proceeding without durable record",
                result.label
            );
            return None;
        };

        if let Some(severity) = result.label.severity() {
            self.context.history.record(EmergencyHistoryEntry {
                time: result.timestamp,
                label: result.label.clone(),
                severity,
                external_id: blob_id.clone(),
            });
        }
        info!("{} emergency recorded as blob {}", result.label, blob_id);
        Some(blob_id)
    }
}

/// Pool occupancy snapshot
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PoolStats {
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub queued: usize,
}

/// Bounded queue of windows drained by a bounded number of pipeline runs
pub struct PipelinePool {
    submit_tx: mpsc::Sender<WindowJob>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl PipelinePool {
    /// Must be called from within a Tokio runtime
    pub fn new(config: &PipelineConfig, pipeline: Arc<ClassificationPipeline>) -> Self {
        let (submit_tx, submit_rx) = mpsc::channel::<WindowJob>(config.queue_capacity.max(1));
        let max_concurrent = config.max_concurrent_pipelines.max(1);

        let pool = Self {
            submit_tx,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        };

        pool.start_dispatcher(submit_rx, pipeline);
        pool
    }

    fn start_dispatcher(
        &self,
        mut submit_rx: mpsc::Receiver<WindowJob>,
        pipeline: Arc<ClassificationPipeline>,
    ) {
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            while let Some(job) = submit_rx.recv().await {
                // Blocks while every worker slot is busy, leaving later jobs queued
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Pipeline dispatcher stopping: {}", e);
                        break;
                    }
                };

                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    pipeline.run(job).await;
                });
            }
            debug!("Pipeline dispatcher finished");
        });
    }

    /// Enqueue without waiting; a full queue rejects the new window
    pub fn try_submit(&self, job: WindowJob) -> SentinelResult<()> {
        self.submit_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SentinelError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SentinelError::QueueClosed,
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrent: self.max_concurrent,
            available_slots: self.semaphore.available_permits(),
            queued: self.submit_tx.max_capacity() - self.submit_tx.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SlidingWindowBuffer;
    use crate::types::{ActivityLabel, Sample, Severity};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct FixedClassifier {
        label: &'static str,
        confidence: f64,
        delay: Duration,
    }

    impl FixedClassifier {
        fn new(label: &'static str, confidence: f64) -> Self {
            Self {
                label,
                confidence,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn infer(&self, _features: &[f32]) -> SentinelResult<Prediction> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Prediction::new(self.label, self.confidence))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn infer(&self, _features: &[f32]) -> SentinelResult<Prediction> {
            Err(SentinelError::Classifier("model unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        blob_id: Option<&'static str>,
        published: Mutex<Vec<(Value, String)>>,
    }

    #[async_trait]
    impl PublishSink for RecordingSink {
        async fn publish(&self, record: Value, kind: &str) -> Option<String> {
            self.published.lock().push((record, kind.to_string()));
            self.blob_id.map(str::to_string)
        }

        async fn retrieve(&self, _external_id: &str) -> Option<Value> {
            None
        }
    }

    struct StalledSink {
        delay: Duration,
    }

    #[async_trait]
    impl PublishSink for StalledSink {
        async fn publish(&self, _record: Value, _kind: &str) -> Option<String> {
            tokio::time::sleep(self.delay).await;
            Some("too-late".to_string())
        }

        async fn retrieve(&self, _external_id: &str) -> Option<Value> {
            None
        }
    }

    fn job(values: &[f32]) -> WindowJob {
        let buffer = SlidingWindowBuffer::new(values.len());
        for v in values {
            buffer.push(Arc::new(Sample::new(vec![*v])));
        }
        WindowJob {
            window: buffer.snapshot().unwrap(),
            magnitude: 1.25,
            sequence: values.len() as u64,
        }
    }

    fn pipeline(
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn PublishSink>,
        config: &PipelineConfig,
    ) -> (ClassificationPipeline, BroadcastHub, EmergencyHistory) {
        let hub = BroadcastHub::new();
        let history = EmergencyHistory::new();
        let context = PipelineContext {
            classifier,
            sink,
            hub: hub.clone(),
            history: history.clone(),
            user_context: UserContext::default(),
        };
        (
            ClassificationPipeline::new(WindowPreprocessor::new(1), context, config),
            hub,
            history,
        )
    }

    #[tokio::test]
    async fn test_fall_published_and_blob_id_broadcast() {
        let sink = Arc::new(RecordingSink {
            blob_id: Some("blob-1"),
            ..Default::default()
        });
        let (pipeline, hub, history) = pipeline(
            Arc::new(FixedClassifier::new("Fall", 0.95)),
            sink.clone(),
            &PipelineConfig::default(),
        );
        let mut sub = hub.connect().unwrap();

        let message = pipeline.run(job(&[1.0, 2.0, 3.0, 4.0])).await;
        assert!(message.is_emergency);
        assert_eq!(message.prediction, ActivityLabel::Fall);
        assert_eq!(message.blob_id.as_deref(), Some("blob-1"));
        assert_eq!(message.magnitude, 1.25);

        {
            let published = sink.published.lock();
            assert_eq!(published.len(), 1);
            assert_eq!(published[0].1, "event");
            assert_eq!(published[0].0["result"]["label"], "Fall");
            assert_eq!(published[0].0["user_context"]["subject_id"], "default-subject");
        }

        let entries = history.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].external_id, "blob-1");
        assert_eq!(entries[0].severity, Severity::Critical);

        let delivered: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(delivered["blob_id"], "blob-1");
        assert_eq!(delivered["is_emergency"], true);
    }

    #[tokio::test]
    async fn test_failed_publish_still_broadcasts_emergency() {
        let sink = Arc::new(RecordingSink::default());
        let (pipeline, hub, history) = pipeline(
            Arc::new(FixedClassifier::new("Fall", 0.95)),
            sink.clone(),
            &PipelineConfig::default(),
        );
        let mut sub = hub.connect().unwrap();

        let message = pipeline.run(job(&[1.0, 2.0])).await;
        assert!(message.is_emergency);
        assert!(message.blob_id.is_none());
        assert_eq!(sink.published.lock().len(), 1);
        assert!(history.is_empty());

        let delivered: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert!(delivered.get("blob_id").is_none());
        assert_eq!(delivered["is_emergency"], true);
    }

    #[tokio::test]
    async fn test_sink_timeout_still_broadcasts_emergency() {
        let config = PipelineConfig {
            sink_timeout: Duration::from_millis(10),
            ..PipelineConfig::default()
        };
        let sink = StalledSink {
            delay: Duration::from_secs(5),
        };
        let (pipeline, hub, history) = pipeline(
            Arc::new(FixedClassifier::new("Fall", 0.95)),
            Arc::new(sink),
            &config,
        );
        let mut sub = hub.connect().unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), pipeline.run(job(&[1.0])))
            .await
            .expect("publish was not bounded");
        assert_eq!(message.prediction, ActivityLabel::Fall);
        assert!(message.is_emergency);
        assert!(message.blob_id.is_none());
        assert!(history.is_empty());

        let delivered: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(delivered["prediction"], "Fall");
        assert_eq!(delivered["is_emergency"], true);
        assert!(delivered.get("blob_id").is_none());
    }

    #[tokio::test]
    async fn test_result_is_stamped_with_window_capture_time() {
        let captured_at = chrono::DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let buffer = SlidingWindowBuffer::new(2);
        buffer.push(Arc::new(Sample::new(vec![1.0])));
        buffer.push(Arc::new(Sample::with_timestamp(vec![2.0], captured_at)));
        let job = WindowJob {
            window: buffer.snapshot().unwrap(),
            magnitude: 2.0,
            sequence: 2,
        };
        let (pipeline, _hub, _history) = pipeline(
            Arc::new(FixedClassifier::new("Normal", 0.9)),
            Arc::new(RecordingSink::default()),
            &PipelineConfig::default(),
        );

        let message = pipeline.run(job).await;
        assert_eq!(message.timestamp, captured_at);
    }

    #[tokio::test]
    async fn test_normal_window_skips_sink() {
        let sink = Arc::new(RecordingSink::default());
        let (pipeline, _hub, _history) = pipeline(
            Arc::new(FixedClassifier::new("Normal", 0.9)),
            sink.clone(),
            &PipelineConfig::default(),
        );

        let message = pipeline.run(job(&[1.0])).await;
        assert!(!message.is_emergency);
        assert!(sink.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_classifier_failure_degrades_to_default() {
        let (pipeline, _hub, _history) = pipeline(
            Arc::new(FailingClassifier),
            Arc::new(RecordingSink::default()),
            &PipelineConfig::default(),
        );

        let message = pipeline.run(job(&[1.0])).await;
        assert_eq!(message.prediction, ActivityLabel::Normal);
        assert_eq!(message.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_classifier_timeout_degrades_to_default() {
        let config = PipelineConfig {
            classifier_timeout: Duration::from_millis(10),
            ..PipelineConfig::default()
        };
        let slow = FixedClassifier {
            label: "Fall",
            confidence: 0.99,
            delay: Duration::from_secs(5),
        };
        let (pipeline, _hub, _history) =
            pipeline(Arc::new(slow), Arc::new(RecordingSink::default()), &config);

        let message = pipeline.run(job(&[1.0])).await;
        assert_eq!(message.prediction, ActivityLabel::Normal);
        assert!(!message.is_emergency);
    }

    #[tokio::test]
    async fn test_pool_runs_submitted_windows() {
        let (pipeline, hub, _history) = pipeline(
            Arc::new(FixedClassifier::new("Normal", 0.8)),
            Arc::new(RecordingSink::default()),
            &PipelineConfig::default(),
        );
        let mut sub = hub.connect().unwrap();
        let pool = PipelinePool::new(&PipelineConfig::default(), Arc::new(pipeline));

        pool.try_submit(job(&[1.0, 2.0])).unwrap();
        pool.try_submit(job(&[3.0, 4.0])).unwrap();

        for _ in 0..2 {
            let payload = tokio::time::timeout(Duration::from_secs(2), sub.receiver.recv())
                .await
                .unwrap()
                .unwrap();
            let delivered: Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(delivered["prediction"], "Normal");
        }
        assert_eq!(pool.stats().max_concurrent, 4);
    }

    #[tokio::test]
    async fn test_pool_rejects_when_queue_full() {
        let config = PipelineConfig {
            max_concurrent_pipelines: 1,
            queue_capacity: 1,
            classifier_timeout: Duration::from_secs(30),
            ..PipelineConfig::default()
        };
        let slow = FixedClassifier {
            label: "Normal",
            confidence: 0.5,
            delay: Duration::from_secs(10),
        };
        let (pipeline, _hub, _history) =
            pipeline(Arc::new(slow), Arc::new(RecordingSink::default()), &config);
        let pool = PipelinePool::new(&config, Arc::new(pipeline));

        let mut rejected = 0;
        for _ in 0..6 {
            if let Err(e) = pool.try_submit(job(&[1.0])) {
                assert!(matches!(e, SentinelError::QueueFull));
                rejected += 1;
            }
            tokio::task::yield_now().await;
        }
        // One running, one held by the dispatcher, one queued
        assert!(rejected >= 3);
    }
}
