use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::coordinator::{IngestOutcome, IngestStats};
use crate::pipeline::PoolStats;
use crate::state::AppState;
use crate::types::{EmergencyHistoryEntry, StreamState};

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Packet posted by a sensor
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub csi: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// Accept one CSI packet
pub async fn ingest_csi(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let outcome = state.coordinator.ingest(request.csi).map_err(|e| {
        warn!("Rejected packet: {}", e);
        let status = if e.is_contract_violation() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, e.to_string())
    })?;

    Ok(Json(IngestResponse {
        status: "received",
        outcome,
    }))
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub subscribers: usize,
    pub stream_state: StreamState,
    pub buffered: usize,
    pub window_size: usize,
    pub feature_dim: usize,
    pub hop_size: usize,
    pub classifier: String,
    pub emergencies_recorded: usize,
    pub ingest: IngestStats,
    pub pipeline: PoolStats,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let window = state.coordinator.window_config();
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        subscribers: state.hub.subscriber_count(),
        stream_state: state.coordinator.state(),
        buffered: state.coordinator.buffered(),
        window_size: window.window_size,
        feature_dim: window.feature_dim,
        hop_size: window.hop_size,
        classifier: state.classifier_name.clone(),
        emergencies_recorded: state.history.len(),
        ingest: state.coordinator.stats(),
        pipeline: state.coordinator.pool_stats(),
    };

    (StatusCode::OK, Json(response))
}

/// Query params for the emergency history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Published emergencies, newest first
pub async fn list_emergencies(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<EmergencyHistoryEntry>> {
    Json(
        state
            .history
            .recent(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
    )
}

/// Fetch a published emergency record back from the blob store
pub async fn get_blob(
    State(state): State<AppState>,
    Path(blob_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    state
        .sink
        .retrieve(&blob_id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Blob {} not found", blob_id)))
}
