//! The mission worker.
//!
//! A worker ticks on a poll interval: claim a lease, run the mission
//! runtime under the mission timeout, submit the trace (best-effort), and
//! report the outcome with the lease it holds. A concurrent heartbeat task
//! keeps the lease alive while the mission runs; heartbeat failures are
//! counted but never abort the work — lease expiry in the kernel is the
//! authority.
//!
//! Any number of workers may run against one kernel: exclusivity comes from
//! leasing, and duplicate work collapses through idempotent submission and
//! the report sidecar check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use roastd_core::cancel::CancelToken;
use roastd_core::mission::Mission;
use roastd_core::queue::{LeaseOutcome, MissionQueue};
use roastd_core::runtime::{RuntimeError, RuntimeFailure};
use roastd_core::trace::{Trace, TraceSink};
use roastd_core::SinkError;

/// Default worker tick interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default per-mission execution timeout.
pub const DEFAULT_MISSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default lease heartbeat interval. Must stay well under half the lease
/// TTL so one missed beat cannot lose the lease.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub agent_name: String,
    /// Goals this worker claims; empty claims anything.
    pub goals: Vec<String>,
    pub poll_interval: Duration,
    pub mission_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    /// Defaults for everything but the agent name.
    #[must_use]
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            goals: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            mission_timeout: DEFAULT_MISSION_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Reject configurations whose heartbeat cannot keep a lease alive.
    pub fn validate(&self, lease_ttl: Duration) -> Result<(), String> {
        if self.heartbeat_interval >= lease_ttl / 2 {
            return Err(format!(
                "heartbeat interval {:?} must be < half the lease TTL {:?}",
                self.heartbeat_interval, lease_ttl
            ));
        }
        Ok(())
    }
}

/// Runs one mission attempt. Implemented by the mission runtime adapter in
/// the server binary and by scripted runners in tests.
#[async_trait::async_trait]
pub trait MissionRunner: Send + Sync {
    async fn run(
        &self,
        mission: &Mission,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Result<Trace, RuntimeFailure>;
}

/// Idempotency sidecar: reports already produced for a session.
///
/// When a claimed mission's session already has a report, the worker
/// completes immediately with the existing result instead of re-running.
#[async_trait::async_trait]
pub trait ReportIndex: Send + Sync {
    async fn find_existing(&self, session_id: &str) -> Result<Option<Value>, SinkError>;
}

/// Point-in-time worker counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub already_exists: u64,
    pub heartbeat_failures: u64,
    pub stale_results: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    already_exists: AtomicU64,
    heartbeat_failures: AtomicU64,
    stale_results: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// A long-running mission worker.
pub struct Worker {
    queue: Arc<dyn MissionQueue>,
    runner: Arc<dyn MissionRunner>,
    traces: Arc<dyn TraceSink>,
    reports: Option<Arc<dyn ReportIndex>>,
    config: WorkerConfig,
    counters: Arc<Counters>,
}

impl Worker {
    #[must_use]
    pub fn new(
        queue: Arc<dyn MissionQueue>,
        runner: Arc<dyn MissionRunner>,
        traces: Arc<dyn TraceSink>,
        reports: Option<Arc<dyn ReportIndex>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            runner,
            traces,
            reports,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Tick until shutdown. One mission is processed per tick at most.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(agent = %self.config.agent_name, "worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.note_error(e.clone()).await;
                        warn!(agent = %self.config.agent_name, error = %e, "worker tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(agent = %self.config.agent_name, "worker shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Claim and process at most one mission.
    pub async fn tick(&self) -> Result<(), String> {
        let mission = self
            .queue
            .claim(&self.config.agent_name, &self.config.goals)
            .await
            .map_err(|e| e.to_string())?;
        let Some(mission) = mission else {
            return Ok(());
        };
        self.process(mission).await;
        Ok(())
    }

    /// Worker counters.
    pub async fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            already_exists: self.counters.already_exists.load(Ordering::Relaxed),
            heartbeat_failures: self.counters.heartbeat_failures.load(Ordering::Relaxed),
            stale_results: self.counters.stale_results.load(Ordering::Relaxed),
            last_error: self.counters.last_error.lock().await.clone(),
        }
    }

    async fn process(&self, mission: Mission) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        let Some(lease_id) = mission.lease_id else {
            // A claim without a lease violates the kernel contract.
            self.note_error("claimed mission carried no lease".to_owned())
                .await;
            return;
        };

        debug!(
            mission_id = %mission.mission_id,
            goal = %mission.goal,
            attempt = mission.attempts,
            "processing mission"
        );

        // Idempotency sidecar: a session that already has a report is done.
        if let (Some(reports), Some(session_id)) = (&self.reports, mission.session_id()) {
            match reports.find_existing(session_id).await {
                Ok(Some(existing)) => {
                    self.counters.already_exists.fetch_add(1, Ordering::Relaxed);
                    info!(
                        mission_id = %mission.mission_id,
                        session_id = %session_id,
                        "report already exists; completing without execution"
                    );
                    self.finish_complete(&mission, lease_id, existing).await;
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    // Sidecar trouble is not fatal; run the mission.
                    warn!(error = %e, "report sidecar lookup failed");
                }
            }
        }

        let cancel = CancelToken::new();
        let heartbeats = self.spawn_heartbeats(mission.mission_id, lease_id);

        let outcome = self
            .runner
            .run(&mission, self.config.mission_timeout, cancel.clone())
            .await;

        cancel.cancel();
        heartbeats.abort();

        match outcome {
            Ok(trace) => {
                self.submit_trace(&trace).await;
                let result_meta = serde_json::json!({
                    "traceId": trace.trace_id,
                    "sessionId": mission.session_id(),
                });
                self.finish_complete(&mission, lease_id, result_meta).await;
            }
            Err(failure) => {
                self.submit_trace(&failure.trace).await;
                let (retryable, reason) = classify(&failure.error);
                debug!(
                    mission_id = %mission.mission_id,
                    retryable,
                    reason = %reason,
                    "mission attempt failed"
                );
                self.finish_fail(&mission, lease_id, &reason, retryable).await;
            }
        }
    }

    fn spawn_heartbeats(
        &self,
        mission_id: uuid::Uuid,
        lease_id: uuid::Uuid,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let counters = Arc::clone(&self.counters);
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.heartbeat(mission_id, lease_id).await {
                    Ok(LeaseOutcome::Ok) => {}
                    Ok(LeaseOutcome::Stale) => {
                        // Lease gone; the kernel will reissue the mission.
                        // Keep beating is pointless but harmless — stop.
                        warn!(mission_id = %mission_id, "heartbeat found lease stale");
                        return;
                    }
                    Err(e) => {
                        counters.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
                        let mut last = counters.last_error.lock().await;
                        *last = Some(format!("heartbeat: {e}"));
                    }
                }
            }
        })
    }

    async fn submit_trace(&self, trace: &Trace) {
        if let Err(e) = self.traces.record(trace).await {
            // Best-effort: the mission outcome is not tied to the sink.
            warn!(trace_id = %trace.trace_id, error = %e, "trace submission failed");
        }
    }

    async fn finish_complete(&self, mission: &Mission, lease_id: uuid::Uuid, result: Value) {
        match self
            .queue
            .complete(mission.mission_id, lease_id, result)
            .await
        {
            Ok(LeaseOutcome::Ok) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(LeaseOutcome::Stale) => {
                // The lease lapsed and the kernel reissued the mission; this
                // result is discarded.
                self.counters.stale_results.fetch_add(1, Ordering::Relaxed);
                warn!(mission_id = %mission.mission_id, "complete rejected: stale lease");
            }
            Err(e) => {
                self.note_error(format!("complete: {e}")).await;
                warn!(mission_id = %mission.mission_id, error = %e, "complete failed");
            }
        }
    }

    async fn finish_fail(
        &self,
        mission: &Mission,
        lease_id: uuid::Uuid,
        reason: &str,
        retryable: bool,
    ) {
        match self
            .queue
            .fail(mission.mission_id, lease_id, reason, retryable)
            .await
        {
            Ok(LeaseOutcome::Ok) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(LeaseOutcome::Stale) => {
                self.counters.stale_results.fetch_add(1, Ordering::Relaxed);
                warn!(mission_id = %mission.mission_id, "fail rejected: stale lease");
            }
            Err(e) => {
                self.note_error(format!("fail: {e}")).await;
                warn!(mission_id = %mission.mission_id, error = %e, "fail report failed");
            }
        }
    }

    async fn note_error(&self, message: String) {
        let mut last = self.counters.last_error.lock().await;
        *last = Some(message);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Classify a runtime failure into (retryable, reason).
///
/// Timeouts and cancellations retry. Step failures retry only when the
/// reason looks transient (network error patterns or an explicitly
/// transient tool failure); everything else is fatal.
fn classify(error: &RuntimeError) -> (bool, String) {
    match error {
        RuntimeError::Timeout { .. } => (true, "timeout".to_owned()),
        RuntimeError::Cancelled => (true, "cancelled".to_owned()),
        RuntimeError::Step { reason, .. } => {
            let lowered = reason.to_lowercase();
            let transient = lowered.contains("transient")
                || lowered.contains("timeout")
                || reason.contains("ECONN")
                || reason.contains("ENET");
            (transient, reason.clone())
        }
    }
}
