pub mod buffer;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod history;
pub mod hub;
pub mod pipeline;
pub mod preprocess;
pub mod server;
pub mod simulator;
pub mod sink;
pub mod state;
pub mod traits;
pub mod types;
pub mod websocket;

pub use buffer::{PushReceipt, SlidingWindowBuffer};
pub use classifier::{load_classifier, CentroidClassifier, MockClassifier};
pub use config::{ConfigError, PipelineConfig, ServiceConfig, SinkConfig, WindowConfig};
pub use coordinator::{IngestOutcome, IngestStats, IngestionCoordinator};
pub use history::EmergencyHistory;
pub use hub::{BroadcastHub, BroadcastReport, SubscriberHandle, Subscription};
pub use pipeline::{ClassificationPipeline, PipelineContext, PipelinePool, PoolStats, WindowJob};
pub use preprocess::WindowPreprocessor;
pub use server::build_router;
pub use sink::{DisabledSink, WalrusSink};
pub use state::AppState;
pub use traits::{Classifier, PublishSink, SentinelError, SentinelResult};
pub use types::*;
