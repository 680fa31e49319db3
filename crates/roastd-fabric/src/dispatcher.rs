//! The session-closed dispatcher.
//!
//! Subscribes to the configured wildcard topics (default
//! `ops/+/+/+/session/closed`), validates each payload against the
//! `SessionClosed` schema, and submits an idempotency-keyed mission request
//! to the kernel. Malformed payloads and kernel errors are counted and
//! recorded in a bounded ring of recent errors; nothing a single message
//! does can kill the subscription.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use roastd_bus::EventBus;
use roastd_core::event::{decode_session_closed, SessionClosed};
use roastd_core::mission::MissionRequest;
use roastd_core::queue::{MissionQueue, SubmitOutcome};
use roastd_core::{EventError, QueueError};

/// Size of the recent-error ring.
const ERROR_RING_SIZE: usize = 20;

/// Default subscription filter.
pub const DEFAULT_TOPIC: &str = "ops/+/+/+/session/closed";

/// Default mission goal for a closed session.
pub const DEFAULT_GOAL: &str = "generate-roast-report";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub topics: Vec<String>,
    /// Goals this dispatcher may create; the first is used for new missions.
    pub goals: Vec<String>,
    pub max_attempts: Option<u32>,
    pub replay_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topics: vec![DEFAULT_TOPIC.to_owned()],
            goals: vec![DEFAULT_GOAL.to_owned()],
            max_attempts: None,
            replay_enabled: false,
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub at: DateTime<Utc>,
    pub context: String,
    pub message: String,
}

/// Point-in-time dispatcher status for the operational read endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStatus {
    pub topics: Vec<String>,
    pub goals: Vec<String>,
    pub replay_enabled: bool,
    pub parse_errors: u64,
    pub validation_errors: u64,
    pub missions_created: u64,
    pub missions_deduped: u64,
    pub kernel_errors: u64,
    pub recent_errors: Vec<RecentError>,
}

#[derive(Default)]
struct Counters {
    parse_errors: AtomicU64,
    validation_errors: AtomicU64,
    missions_created: AtomicU64,
    missions_deduped: AtomicU64,
    kernel_errors: AtomicU64,
    recent: Mutex<VecDeque<RecentError>>,
}

impl Counters {
    async fn record_error(&self, context: &str, message: String) {
        let mut recent = self.recent.lock().await;
        if recent.len() == ERROR_RING_SIZE {
            recent.pop_front();
        }
        recent.push_back(RecentError {
            at: Utc::now(),
            context: context.to_owned(),
            message,
        });
    }
}

/// Translates session-closed events into mission submissions.
pub struct Dispatcher {
    queue: Arc<dyn MissionQueue>,
    config: DispatcherConfig,
    counters: Counters,
}

impl Dispatcher {
    #[must_use]
    pub fn new(queue: Arc<dyn MissionQueue>, config: DispatcherConfig) -> Self {
        Self {
            queue,
            config,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Subscribe and process messages until shutdown. Per-message failures
    /// are swallowed (counted, logged) — the subscription itself only ends
    /// on shutdown or when the bus channel closes.
    pub async fn run(
        &self,
        bus: &dyn EventBus,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), roastd_bus::BusError> {
        let mut rx = bus.subscribe(&self.config.topics).await?;
        info!(topics = ?self.config.topics, "dispatcher subscribed");

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        warn!("dispatcher bus channel closed");
                        return Ok(());
                    };
                    self.handle_payload(&message.payload).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("dispatcher shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Process one raw payload. Never errors: every failure mode is counted
    /// and dropped.
    pub async fn handle_payload(&self, payload: &[u8]) {
        let event = match decode_session_closed(payload) {
            Ok(event) => event,
            Err(EventError::Parse { reason }) => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.record_error("parse", reason.clone()).await;
                warn!(reason = %reason, "session event payload is not JSON; dropped");
                return;
            }
            Err(EventError::Validation { reason }) => {
                self.counters
                    .validation_errors
                    .fetch_add(1, Ordering::Relaxed);
                self.counters.record_error("validation", reason.clone()).await;
                warn!(reason = %reason, "session event failed validation; dropped");
                return;
            }
        };

        if let Err(e) = self.submit_for(&event).await {
            self.counters.kernel_errors.fetch_add(1, Ordering::Relaxed);
            self.counters.record_error("kernel", e.to_string()).await;
            warn!(
                session_id = %event.session_id,
                error = %e,
                "mission submit failed; event dropped"
            );
        }
    }

    /// Re-submit a validated event (operational recovery). The idempotency
    /// key is identical to the original submission, so a replay of an event
    /// whose mission is still live dedupes.
    pub async fn replay(&self, event: SessionClosed) -> Result<SubmitOutcome, ReplayError> {
        if !self.config.replay_enabled {
            return Err(ReplayError::Disabled);
        }
        event.validate().map_err(|e| ReplayError::Invalid {
            reason: e.to_string(),
        })?;
        info!(session_id = %event.session_id, "replaying session-closed event");
        self.submit_for(&event).await.map_err(ReplayError::Submit)
    }

    /// The mission request a session-closed event maps to.
    #[must_use]
    pub fn request_for(&self, event: &SessionClosed) -> MissionRequest {
        let goal = self
            .config
            .goals
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_GOAL.to_owned());
        MissionRequest {
            params: serde_json::json!({
                "sessionId": event.session_id,
                "reportKind": event.report_kind,
            }),
            subject_id: Some(event.session_id.clone()),
            idempotency_key: Some(format!(
                "{goal}:{}:{}",
                event.report_kind, event.session_id
            )),
            max_attempts: self.config.max_attempts,
            ..MissionRequest::new(goal)
        }
    }

    async fn submit_for(&self, event: &SessionClosed) -> Result<SubmitOutcome, QueueError> {
        let request = self.request_for(event);
        let outcome = self.queue.submit(request).await?;
        match &outcome {
            SubmitOutcome::Created(mission) => {
                self.counters
                    .missions_created
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    mission_id = %mission.mission_id,
                    session_id = %event.session_id,
                    "mission created for closed session"
                );
            }
            SubmitOutcome::Deduped(mission) => {
                self.counters
                    .missions_deduped
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    mission_id = %mission.mission_id,
                    session_id = %event.session_id,
                    "mission submit deduped"
                );
            }
        }
        Ok(outcome)
    }

    /// Counters, recent errors, and the effective configuration.
    pub async fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            topics: self.config.topics.clone(),
            goals: self.config.goals.clone(),
            replay_enabled: self.config.replay_enabled,
            parse_errors: self.counters.parse_errors.load(Ordering::Relaxed),
            validation_errors: self.counters.validation_errors.load(Ordering::Relaxed),
            missions_created: self.counters.missions_created.load(Ordering::Relaxed),
            missions_deduped: self.counters.missions_deduped.load(Ordering::Relaxed),
            kernel_errors: self.counters.kernel_errors.load(Ordering::Relaxed),
            recent_errors: self.counters.recent.lock().await.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Errors from the replay endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay is disabled")]
    Disabled,

    #[error("invalid event: {reason}")]
    Invalid { reason: String },

    #[error(transparent)]
    Submit(#[from] QueueError),
}
