use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{get_blob, health_check, ingest_csi, list_emergencies};
use crate::state::AppState;
use crate::websocket::handle_monitor;

/// All HTTP and WebSocket routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest_csi))
        .route("/ws/monitor", get(handle_monitor))
        .route("/health", get(health_check))
        .route("/api/emergencies", get(list_emergencies))
        .route("/api/blobs/{blob_id}", get(get_blob))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
