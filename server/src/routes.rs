use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{commands, egress, ingest};

async fn root() -> &'static str {
    "OK. Upload via POST /upload or WS /ws/upload; view via /latest.jpg, /stream.mjpeg or WS /ws/view; commands via POST /commands and WS /ws/commands"
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.ingest.max_upload_bytes;
    Router::new()
        .route("/", get(root))
        .route("/health", get(egress::health))
        .route(
            "/upload",
            post(ingest::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/ws/upload", get(ingest::push_upgrade))
        .route("/latest.jpg", get(egress::latest))
        .route("/stream.mjpeg", get(egress::stream))
        .route("/ws/view", get(egress::view_upgrade))
        .route("/commands", post(commands::broadcast_command))
        .route("/ws/commands", get(commands::command_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
