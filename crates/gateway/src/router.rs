use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::routes::{cancel, dashboard, health, status, submit};
use crate::state::AppState;

/// Assembles every HTTP route behind one shared [`AppState`], mirroring the
/// one-router-per-service layout: plain routes first, then the one route
/// that needs its own body-size layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_archive_bytes = state.config.max_archive_bytes;

    let submit_with_files = Router::new()
        .route("/submit_with_files", post(submit::submit_with_files))
        .layer(DefaultBodyLimit::max(max_archive_bytes as usize));

    Router::new()
        .route("/submit", post(submit::submit))
        .route("/status/{request_id}", get(status::status))
        .route("/requests", get(status::requests))
        .route("/cancel/{request_id}", delete(cancel::cancel))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/dashboard/ws", get(dashboard::ws_upgrade))
        .merge(submit_with_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
