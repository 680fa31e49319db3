//! End-to-end HTTP surface tests (no broker or hardware required).
//!
//! Each test builds the full router over an in-memory SQLite database and
//! drives it with `tower::ServiceExt::oneshot`, exercising submit → claim →
//! heartbeat → complete/fail, the proposal lifecycle, and the governance
//! surface the way external processes do.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use roastd_fabric::{
    CommandService, Dispatcher, DispatcherConfig, DriverRegistry, Governor, TracingAlertSink,
};
use roastd_server::routes;
use roastd_server::state::AppState;
use roastd_store::{Db, Dialect, GovernanceStore, MissionStore, ProposalStore, TraceStore};

async fn app() -> Router {
    let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();

    let missions = MissionStore::new(db.clone());
    let traces = TraceStore::new(db.clone());
    let proposals = ProposalStore::new(db.clone());
    let governance = GovernanceStore::new(db);
    governance.load_state().await.unwrap();
    governance.seed_default_rules().await.unwrap();

    let drivers = Arc::new(DriverRegistry::new());
    let commands = CommandService::new(proposals.clone(), governance.clone(), Arc::clone(&drivers));
    let governor = Governor::new(
        proposals.clone(),
        governance.clone(),
        Arc::new(TracingAlertSink),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(missions.clone()),
        DispatcherConfig {
            replay_enabled: true,
            ..DispatcherConfig::default()
        },
    ));

    routes::router(Arc::new(AppState {
        missions,
        traces,
        proposals,
        commands,
        governance,
        governor,
        dispatcher,
    }))
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn submit_body(session: &str) -> Value {
    json!({
        "goal": "generate-roast-report",
        "params": { "sessionId": session, "reportKind": "POST_ROAST_V1" },
        "idempotencyKey": format!("generate-roast-report:POST_ROAST_V1:{session}"),
    })
}

#[tokio::test]
async fn healthz_answers() {
    let app = app().await;
    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn submit_then_resubmit_is_created_then_deduped() {
    let app = app().await;

    let created = app
        .clone()
        .oneshot(post("/missions", submit_body("sess-1")))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await;
    assert_eq!(body["outcome"], "created");

    let deduped = app
        .oneshot(post("/missions", submit_body("sess-1")))
        .await
        .unwrap();
    assert_eq!(deduped.status(), StatusCode::CONFLICT);
    let body = json_body(deduped).await;
    assert_eq!(body["outcome"], "deduped");
}

#[tokio::test]
async fn claim_returns_mission_then_no_content() {
    let app = app().await;
    app.clone()
        .oneshot(post("/missions", submit_body("sess-1")))
        .await
        .unwrap();

    let claimed = app
        .clone()
        .oneshot(post("/missions/claim", json!({ "agentName": "worker-1" })))
        .await
        .unwrap();
    assert_eq!(claimed.status(), StatusCode::OK);
    let mission = json_body(claimed).await;
    assert_eq!(mission["status"], "RUNNING");
    assert!(mission["leaseId"].is_string());

    let empty = app
        .oneshot(post("/missions/claim", json!({ "agentName": "worker-2" })))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn complete_with_lease_finishes_the_mission() {
    let app = app().await;
    app.clone()
        .oneshot(post("/missions", submit_body("sess-1")))
        .await
        .unwrap();
    let mission = json_body(
        app.clone()
            .oneshot(post("/missions/claim", json!({ "agentName": "w" })))
            .await
            .unwrap(),
    )
    .await;
    let id = mission["missionId"].as_str().unwrap().to_owned();
    let lease = mission["leaseId"].as_str().unwrap().to_owned();

    let done = app
        .clone()
        .oneshot(post(
            &format!("/missions/{id}/complete"),
            json!({ "leaseId": lease, "summary": { "reportId": "rep-1" } }),
        ))
        .await
        .unwrap();
    assert_eq!(done.status(), StatusCode::OK);

    let loaded = json_body(app.oneshot(get(&format!("/missions/{id}"))).await.unwrap()).await;
    assert_eq!(loaded["status"], "DONE");
    assert_eq!(loaded["resultMeta"]["reportId"], "rep-1");
}

#[tokio::test]
async fn stale_lease_heartbeat_conflicts() {
    let app = app().await;
    app.clone()
        .oneshot(post("/missions", submit_body("sess-1")))
        .await
        .unwrap();
    let mission = json_body(
        app.clone()
            .oneshot(post("/missions/claim", json!({ "agentName": "w" })))
            .await
            .unwrap(),
    )
    .await;
    let id = mission["missionId"].as_str().unwrap().to_owned();

    let stale = app
        .oneshot(post(
            &format!("/missions/{id}/heartbeat"),
            json!({ "leaseId": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(stale.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(stale).await["outcome"], "stale");
}

#[tokio::test]
async fn retryable_fail_requeues_the_mission() {
    let app = app().await;
    app.clone()
        .oneshot(post("/missions", submit_body("sess-1")))
        .await
        .unwrap();
    let mission = json_body(
        app.clone()
            .oneshot(post("/missions/claim", json!({ "agentName": "w" })))
            .await
            .unwrap(),
    )
    .await;
    let id = mission["missionId"].as_str().unwrap().to_owned();
    let lease = mission["leaseId"].as_str().unwrap().to_owned();

    let failed = app
        .clone()
        .oneshot(post(
            &format!("/missions/{id}/fail"),
            json!({ "leaseId": lease, "error": "ECONNRESET", "retryable": true }),
        ))
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::OK);

    let loaded = json_body(app.oneshot(get(&format!("/missions/{id}"))).await.unwrap()).await;
    assert_eq!(loaded["status"], "PENDING");
    assert_eq!(loaded["attempts"], 1);
}

#[tokio::test]
async fn dispatcher_replay_creates_a_mission() {
    let app = app().await;
    let event = json!({
        "type": "session.closed",
        "version": 1,
        "emittedAt": "2026-03-01T12:00:00Z",
        "orgId": "org-1",
        "siteId": "site-1",
        "machineId": "machine-1",
        "sessionId": "sess-replayed",
    });

    let replayed = app
        .clone()
        .oneshot(post("/dispatcher/replay", event))
        .await
        .unwrap();
    assert_eq!(replayed.status(), StatusCode::CREATED);

    let status = json_body(app.oneshot(get("/dispatcher/status")).await.unwrap()).await;
    assert_eq!(status["missionsCreated"], 1);
}

#[tokio::test]
async fn trace_appends_and_reads_back() {
    let app = app().await;
    let mission_id = uuid::Uuid::new_v4();
    let trace = json!({
        "traceId": uuid::Uuid::new_v4(),
        "agentId": "agent-1",
        "missionId": mission_id,
        "status": "SUCCESS",
        "startedAt": "2026-03-01T12:00:00Z",
        "completedAt": "2026-03-01T12:00:01Z",
        "entries": [],
        "metadata": { "loopId": uuid::Uuid::new_v4(), "iterations": 1 },
    });

    let appended = app.clone().oneshot(post("/traces", trace)).await.unwrap();
    assert_eq!(appended.status(), StatusCode::CREATED);

    let listed = json_body(
        app.oneshot(get(&format!("/missions/{mission_id}/traces")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn agent_proposal_walks_the_approval_machine() {
    let app = app().await;

    let proposed = app
        .clone()
        .oneshot(post(
            "/proposals",
            json!({
                "commandType": "SET_POWER",
                "machineId": "machine-1",
                "targetValue": 0.6,
                "proposedBy": "AGENT",
                "reasoning": "ramp for first crack",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(proposed.status(), StatusCode::CREATED);
    let proposal = json_body(proposed).await;
    // Outside the (empty) whitelist: forced through approval.
    assert_eq!(proposal["status"], "PENDING_APPROVAL");
    assert_eq!(proposal["approvalRequired"], true);
    let id = proposal["proposalId"].as_str().unwrap().to_owned();

    let pending = json_body(app.clone().oneshot(get("/proposals/pending")).await.unwrap()).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let approved = json_body(
        app.clone()
            .oneshot(post(
                &format!("/proposals/{id}/approve"),
                json!({ "actor": "operator" }),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(approved["status"], "APPROVED");

    // No driver registered for the machine: execution is rejected upfront.
    let executed = app
        .oneshot(post(&format!("/execute/{id}"), json!({})))
        .await
        .unwrap();
    assert_eq!(executed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn governance_state_starts_at_l3() {
    let app = app().await;
    let state = json_body(app.oneshot(get("/api/governance/state")).await.unwrap()).await;
    assert_eq!(state["currentPhase"], "L3");
    assert_eq!(state["commandWhitelist"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn run_cycle_reports_and_persists_metrics() {
    let app = app().await;

    let report = json_body(
        app.clone()
            .oneshot(post("/api/governance/run-cycle", json!({})))
            .await
            .unwrap(),
    )
    .await;
    // Empty window: not ready, no expansion.
    assert_eq!(report["readiness"]["overall"]["ready"], false);
    assert!(report["expansionProposal"].is_null());

    let metrics = app.oneshot(get("/api/metrics/latest")).await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}

#[tokio::test]
async fn circuit_rules_can_be_patched() {
    let app = app().await;

    let rules = json_body(app.clone().oneshot(get("/api/circuit-breaker/rules")).await.unwrap())
        .await;
    assert!(!rules.as_array().unwrap().is_empty());

    let patch = Request::builder()
        .method("PATCH")
        .uri("/api/circuit-breaker/rules/error-rate-demotion")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "enabled": false }).to_string()))
        .unwrap();
    let patched = json_body(app.clone().oneshot(patch).await.unwrap()).await;
    assert_eq!(patched["enabled"], false);

    let bad_window = Request::builder()
        .method("PATCH")
        .uri("/api/circuit-breaker/rules/error-rate-demotion")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "window": "sideways" }).to_string()))
        .unwrap();
    let rejected = app.oneshot(bad_window).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn readiness_endpoint_scores_fresh() {
    let app = app().await;
    let readiness = json_body(app.oneshot(get("/api/readiness/current")).await.unwrap()).await;
    assert_eq!(readiness["currentPhase"], "L3");
    assert!(readiness["overall"]["score"].is_number());
}
