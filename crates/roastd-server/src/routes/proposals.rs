//! Command proposal routes: `/proposals`, `/execute`, `/abort`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use roastd_fabric::ProposeRequest;

use crate::error::AppError;
use crate::state::AppState;

/// Build the command proposal router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/proposals", post(propose))
        .route("/proposals/pending", get(pending))
        .route("/proposals/{id}", get(get_proposal))
        .route("/proposals/{id}/approve", post(approve))
        .route("/proposals/{id}/reject", post(reject))
        .route("/proposals/{id}/rollback", post(mark_rolled_back))
        .route("/execute/{id}", post(execute))
        .route("/abort/{id}", post(abort))
}

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    actor: String,
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    actor: String,
    reason: String,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn propose(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProposeRequest>,
) -> Result<Response, AppError> {
    let proposal = state.commands.propose(request).await?;
    Ok((StatusCode::CREATED, Json(proposal)).into_response())
}

async fn pending(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(Json(state.commands.pending().await?).into_response())
}

async fn get_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.commands.get(id).await?).into_response())
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> Result<Response, AppError> {
    Ok(Json(state.commands.approve(id, &request.actor).await?).into_response())
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<Response, AppError> {
    Ok(Json(state.commands.reject(id, &request.actor, &request.reason).await?).into_response())
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.commands.execute(id).await?).into_response())
}

async fn abort(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.commands.abort(id).await?).into_response())
}

/// Flag a completed command as rolled back (feeds the rollback rate).
async fn mark_rolled_back(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.proposals.mark_rolled_back(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
