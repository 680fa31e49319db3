//! Mission model.
//!
//! A mission is a unit of goal-directed work with a stable identity and an
//! optional idempotency key. Missions live in the mission kernel (the leased
//! durable queue) and move through a strict status machine:
//!
//! ```text
//! PENDING ──claim──► RUNNING ──complete──► DONE
//!    ▲                  │
//!    └──retryable fail──┘──non-retryable / attempts exhausted──► FAILED
//! ```
//!
//! Terminal missions are never deleted; they are retained for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Default cap on execution attempts when the submitter does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default exclusive-execution lease duration.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// Retry backoff base delay.
const BACKOFF_BASE_MS: u64 = 2_000;

/// Retry backoff ceiling.
const BACKOFF_CAP_MS: u64 = 300_000;

/// Mission scheduling priority. Higher priorities are claimed first;
/// within a priority, claims are FIFO on creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Mission lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl MissionStatus {
    /// Whether this status is terminal. Terminal missions never transition
    /// again and do not participate in idempotency-key dedup.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A mission record as stored in the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    /// Stable mission identity.
    pub mission_id: Uuid,
    /// What the mission is trying to achieve (e.g. `generate-roast-report`).
    pub goal: String,
    /// Opaque goal parameters. The kernel never interprets these beyond the
    /// enumerated keys (`sessionId`, `reportKind`).
    pub params: Value,
    /// Optional subject the mission acts on (used as the policy resource).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub priority: Priority,
    /// Free-form constraint strings carried to the runtime.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Opaque submitter context.
    #[serde(default)]
    pub context: Value,
    /// Dedup key: at most one non-terminal mission may carry a given key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MissionStatus,
    /// Number of claims so far. Never exceeds `max_attempts`.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Present exactly while `status == RUNNING`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// Earliest time the mission may be claimed again after a retryable
    /// failure. `None` means claimable now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_meta: Option<Value>,
}

impl Mission {
    /// Build a fresh PENDING mission from a request.
    #[must_use]
    pub fn from_request(request: MissionRequest, now: DateTime<Utc>) -> Self {
        Self {
            mission_id: Uuid::new_v4(),
            goal: request.goal,
            params: request.params,
            subject_id: request.subject_id,
            priority: request.priority,
            constraints: request.constraints,
            context: request.context,
            idempotency_key: request.idempotency_key,
            created_at: now,
            status: MissionStatus::Pending,
            attempts: 0,
            max_attempts: request.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            lease_id: None,
            lease_expires_at: None,
            last_heartbeat_at: None,
            claimed_by: None,
            claimed_at: None,
            next_retry_at: None,
            result_meta: None,
            error_meta: None,
        }
    }

    /// The `sessionId` param, when the mission carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.params.get("sessionId").and_then(Value::as_str)
    }
}

/// A request to enqueue a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionRequest {
    pub goal: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl MissionRequest {
    /// A minimal request with defaults for everything but the goal.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            params: Value::Null,
            subject_id: None,
            priority: Priority::default(),
            constraints: Vec::new(),
            context: Value::Null,
            idempotency_key: None,
            max_attempts: None,
        }
    }
}

/// Full-jitter exponential retry backoff.
///
/// The delay after the `attempts`-th failed attempt is drawn uniformly from
/// `[0, min(cap, base * 2^(attempts-1))]` with base 2 s and cap 5 min.
#[must_use]
pub fn retry_backoff(attempts: u32) -> Duration {
    use rand::Rng;

    let exponent = attempts.saturating_sub(1).min(16);
    let ceiling_ms = BACKOFF_BASE_MS
        .saturating_mul(1_u64 << exponent)
        .min(BACKOFF_CAP_MS);
    let jittered = rand::thread_rng().gen_range(0..=ceiling_ms);
    Duration::from_millis(jittered)
}

/// The deterministic ceiling `retry_backoff` jitters under, exposed so the
/// store can record `next_retry_at` bounds and tests can assert them.
#[must_use]
pub fn retry_backoff_ceiling(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let ceiling_ms = BACKOFF_BASE_MS
        .saturating_mul(1_u64 << exponent)
        .min(BACKOFF_CAP_MS);
    Duration::from_millis(ceiling_ms)
}
