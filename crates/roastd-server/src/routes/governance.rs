//! Governance routes: `/api/metrics`, `/api/readiness`,
//! `/api/circuit-breaker`, `/api/governance`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use roastd_core::circuit::{parse_window, AlertSeverity, CircuitAction, Condition};
use roastd_core::command::CommandType;
use roastd_core::readiness::assess;

use crate::error::AppError;
use crate::state::AppState;

/// Build the governance router (mounted under `/api`).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics/latest", get(latest_metrics))
        .route("/readiness/current", get(current_readiness))
        .route("/circuit-breaker/events", get(circuit_events))
        .route("/circuit-breaker/rules", get(circuit_rules))
        .route("/circuit-breaker/rules/{name}", patch(patch_rule))
        .route("/circuit-breaker/events/{id}/resolve", post(resolve_event))
        .route("/governance/state", get(governance_state))
        .route("/governance/run-cycle", post(run_cycle))
        .route("/governance/expansions", get(pending_expansions))
        .route("/governance/expansions/{id}/apply", post(apply_expansion))
}

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<i64>,
}

/// Partial rule update; absent fields keep their current value.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulePatch {
    enabled: Option<bool>,
    condition: Option<String>,
    window: Option<String>,
    action: Option<CircuitAction>,
    alert_severity: Option<AlertSeverity>,
    command_type: Option<CommandType>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// The most recently collected metrics snapshot.
async fn latest_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let metrics = state
        .governance
        .latest_metrics()
        .await?
        .ok_or_else(|| AppError::NotFound("no metrics collected yet".to_owned()))?;
    Ok(Json(metrics).into_response())
}

/// Readiness scored fresh over the trailing seven days.
async fn current_readiness(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let now = Utc::now();
    let metrics = state
        .governor
        .collect_metrics(now - Duration::days(7), now)
        .await?;
    let gov = state.governance.load_state().await?;
    let days = now.signed_duration_since(gov.phase_start_date).num_days();
    let report = assess(&metrics, gov.current_phase, days, now);
    Ok(Json(report).into_response())
}

async fn circuit_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.governance.list_events(limit).await?).into_response())
}

async fn circuit_rules(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(Json(state.governance.load_rules().await?).into_response())
}

/// Patch a rule in place. A condition the evaluator does not recognize is
/// accepted but warned about — such a rule never triggers.
async fn patch_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<RulePatch>,
) -> Result<Response, AppError> {
    let mut rule = state
        .governance
        .get_rule(&name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("rule '{name}' not found")))?;

    if let Some(enabled) = body.enabled {
        rule.enabled = enabled;
    }
    if let Some(condition) = body.condition {
        rule.condition = condition;
    }
    if let Some(window) = body.window {
        parse_window(&window)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        rule.window = window;
    }
    if let Some(action) = body.action {
        rule.action = action;
    }
    if let Some(severity) = body.alert_severity {
        rule.alert_severity = severity;
    }
    if let Some(command_type) = body.command_type {
        rule.command_type = Some(command_type);
    }

    if Condition::parse(&rule.condition).is_err() {
        warn!(rule = %rule.name, condition = %rule.condition, "rule condition unrecognized; it will never trigger");
    }

    state.governance.upsert_rule(&rule).await?;
    Ok(Json(rule).into_response())
}

async fn resolve_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.governance.resolve_event(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn governance_state(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(Json(state.governance.load_state().await?).into_response())
}

/// Run one governor cycle on demand.
async fn run_cycle(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(Json(state.governor.run_cycle(Utc::now()).await?).into_response())
}

async fn pending_expansions(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(Json(state.governance.pending_expansion_proposals().await?).into_response())
}

/// Apply an approved expansion to the governance state.
async fn apply_expansion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    Ok(Json(state.governor.apply_expansion(id, Utc::now()).await?).into_response())
}
