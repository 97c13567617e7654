use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::classifier::load_classifier;
use crate::config::ServiceConfig;
use crate::coordinator::IngestionCoordinator;
use crate::history::EmergencyHistory;
use crate::hub::BroadcastHub;
use crate::pipeline::PipelineContext;
use crate::sink::{DisabledSink, WalrusSink};
use crate::traits::{PublishSink, SentinelResult};

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IngestionCoordinator>,
    pub hub: BroadcastHub,
    pub history: EmergencyHistory,
    pub sink: Arc<dyn PublishSink>,
    pub classifier_name: String,
    pub start_time: Instant,
}

impl AppState {
    /// Build every component from configuration. Must be called from within a Tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> SentinelResult<Self> {
        config.validate()?;

        let classifier = load_classifier(&config.model_path);
        let sink: Arc<dyn PublishSink> = if config.sink.enabled {
            info!("Publishing emergencies to {}", config.sink.publisher_url);
            Arc::new(WalrusSink::new(&config.sink)?)
        } else {
            info!("Emergency publishing disabled");
            Arc::new(DisabledSink)
        };

        let context = PipelineContext {
            classifier,
            sink,
            hub: BroadcastHub::with_capacity(config.max_subscribers, config.subscriber_buffer),
            history: EmergencyHistory::new(),
            user_context: config.user_context.clone(),
        };

        Self::from_context(config, context)
    }

    /// Build around caller-supplied collaborators
    pub fn from_context(config: &ServiceConfig, context: PipelineContext) -> SentinelResult<Self> {
        let hub = context.hub.clone();
        let history = context.history.clone();
        let sink = context.sink.clone();
        let classifier_name = context.classifier.name().to_string();

        let coordinator =
            IngestionCoordinator::new(config.window.clone(), config.pipeline.clone(), context)?;

        Ok(Self {
            coordinator: Arc::new(coordinator),
            hub,
            history,
            sink,
            classifier_name,
            start_time: Instant::now(),
        })
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
