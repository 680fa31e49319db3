//! Mission kernel routes: `/missions`, `/traces`, `/dispatcher/*`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use roastd_core::event::SessionClosed;
use roastd_core::mission::{MissionRequest, MissionStatus};
use roastd_core::queue::{LeaseOutcome, SubmitOutcome};
use roastd_core::trace::Trace;

use crate::error::AppError;
use crate::state::AppState;

/// Build the mission kernel router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/missions", post(submit_mission).get(list_missions))
        .route("/missions/claim", post(claim_mission))
        .route("/missions/{id}", get(get_mission))
        .route("/missions/{id}/heartbeat", post(heartbeat_mission))
        .route("/missions/{id}/complete", post(complete_mission))
        .route("/missions/{id}/fail", post(fail_mission))
        .route("/missions/{id}/traces", get(mission_traces))
        .route("/traces", post(append_trace))
        .route("/dispatcher/status", get(dispatcher_status))
        .route("/dispatcher/replay", post(dispatcher_replay))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimRequest {
    agent_name: String,
    #[serde(default)]
    goals: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    lease_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    lease_id: Uuid,
    #[serde(default)]
    summary: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailRequest {
    lease_id: Uuid,
    error: String,
    #[serde(default)]
    details: Option<Value>,
    #[serde(default)]
    retryable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<i64>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Submit a mission. 201 on create, 409 with the existing record on dedup.
async fn submit_mission(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MissionRequest>,
) -> Result<Response, AppError> {
    let outcome = state.missions.submit_mission(request).await?;
    let status = match &outcome {
        SubmitOutcome::Created(_) => StatusCode::CREATED,
        SubmitOutcome::Deduped(_) => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome)).into_response())
}

/// Claim one mission. 200 with the leased mission, 204 when none is ready.
async fn claim_mission(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClaimRequest>,
) -> Result<Response, AppError> {
    if request.agent_name.is_empty() {
        return Err(AppError::BadRequest("agentName must not be empty".to_owned()));
    }
    match state
        .missions
        .claim_mission(&request.agent_name, &request.goals)
        .await?
    {
        Some(mission) => Ok((StatusCode::OK, Json(mission)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn get_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let mission = state
        .missions
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("mission {id} not found")))?;
    Ok(Json(mission).into_response())
}

async fn list_missions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let status = query
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1_000);
    let missions = state.missions.list(status, limit).await?;
    Ok(Json(missions).into_response())
}

async fn heartbeat_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Response, AppError> {
    let outcome = state.missions.heartbeat_mission(id, request.lease_id).await?;
    Ok(lease_response(outcome))
}

async fn complete_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .missions
        .complete_mission(id, request.lease_id, request.summary)
        .await?;
    Ok(lease_response(outcome))
}

async fn fail_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<FailRequest>,
) -> Result<Response, AppError> {
    let mut error = request.error;
    if let Some(details) = &request.details {
        error = format!("{error} ({details})");
    }
    let outcome = state
        .missions
        .fail_mission(id, request.lease_id, &error, request.retryable.unwrap_or(false))
        .await?;
    Ok(lease_response(outcome))
}

/// Append a trace (at-least-once safe).
async fn append_trace(
    State(state): State<Arc<AppState>>,
    Json(trace): Json<Trace>,
) -> Result<Response, AppError> {
    state.traces.append(&trace).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn mission_traces(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let traces = state.traces.for_mission(id).await?;
    Ok(Json(traces).into_response())
}

async fn dispatcher_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.dispatcher.status().await).into_response()
}

/// Force a re-submit of a validated session-closed event.
async fn dispatcher_replay(
    State(state): State<Arc<AppState>>,
    Json(event): Json<SessionClosed>,
) -> Result<Response, AppError> {
    let outcome = state.dispatcher.replay(event).await?;
    let status = match &outcome {
        SubmitOutcome::Created(_) => StatusCode::CREATED,
        SubmitOutcome::Deduped(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)).into_response())
}

fn lease_response(outcome: LeaseOutcome) -> Response {
    match outcome {
        LeaseOutcome::Ok => (
            StatusCode::OK,
            Json(serde_json::json!({ "outcome": "ok" })),
        )
            .into_response(),
        LeaseOutcome::Stale => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "outcome": "stale" })),
        )
            .into_response(),
    }
}

fn parse_status(value: &str) -> Result<MissionStatus, AppError> {
    match value {
        "PENDING" => Ok(MissionStatus::Pending),
        "RUNNING" => Ok(MissionStatus::Running),
        "DONE" => Ok(MissionStatus::Done),
        "FAILED" => Ok(MissionStatus::Failed),
        other => Err(AppError::BadRequest(format!("unknown status '{other}'"))),
    }
}
