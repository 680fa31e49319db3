//! HTTP routes for the `roastd` server.

pub mod governance;
pub mod missions;
pub mod proposals;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

/// The full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(missions::router())
        .merge(proposals::router())
        .nest("/api", governance::router())
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
