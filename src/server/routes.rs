//! Router definition

use super::{download, upload, AppState};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, Method},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: &AppState) -> Router {
    let body_limit = state
        .limits
        .max_upload_bytes
        .saturating_add(upload::MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health))
        .route(
            "/upload",
            post(upload::upload_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/download/:token", get(download::download_handler))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone())
}

// Browser front-end is served from another origin and reads the filename header
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_DISPOSITION])
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = if state.health.is_degraded() {
        "degraded"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "sessions": state.registry.len(),
    }))
}
