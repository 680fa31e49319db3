//! Mission queue contract.
//!
//! [`MissionQueue`] is the verb set every fabric component speaks to the
//! mission kernel: the dispatcher submits, workers claim/heartbeat/complete/
//! fail. Backends implement it over SQL (`roastd-store`), over HTTP
//! (`roastd-fabric`'s kernel client), or in memory (here, for tests and
//! single-process embedding).
//!
//! Lease semantics: a claim hands out a fresh `lease_id` with a TTL. Every
//! mutation of a RUNNING mission must present the current lease; a mismatch
//! is reported as [`LeaseOutcome::Stale`] and leaves the record untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::QueueError;
use crate::mission::{retry_backoff, Mission, MissionRequest, MissionStatus, DEFAULT_LEASE_TTL};

/// Outcome of a mission submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "mission")]
pub enum SubmitOutcome {
    /// A new mission was inserted.
    Created(Mission),
    /// A non-terminal mission with the same idempotency key already exists;
    /// the existing record is returned untouched.
    Deduped(Mission),
}

impl SubmitOutcome {
    /// The mission record, whether fresh or pre-existing.
    #[must_use]
    pub fn mission(&self) -> &Mission {
        match self {
            Self::Created(m) | Self::Deduped(m) => m,
        }
    }

    #[must_use]
    pub fn is_deduped(&self) -> bool {
        matches!(self, Self::Deduped(_))
    }
}

/// Outcome of a lease-fenced verb (`heartbeat`, `complete`, `fail`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseOutcome {
    /// The lease matched and the mutation was applied.
    Ok,
    /// The presented lease is no longer current; nothing was mutated.
    Stale,
}

/// The mission kernel verb set.
#[async_trait::async_trait]
pub trait MissionQueue: Send + Sync {
    /// Enqueue a mission, deduplicating on `idempotency_key` among
    /// non-terminal missions.
    async fn submit(&self, request: MissionRequest) -> Result<SubmitOutcome, QueueError>;

    /// Atomically claim one claimable mission for `agent_name`.
    ///
    /// A mission is claimable when `status == PENDING`, its goal is in
    /// `goals` (when `goals` is non-empty), and `next_retry_at` has passed.
    /// Candidates are ordered by priority (high first), then FIFO. The
    /// returned mission is RUNNING with a fresh lease and `attempts`
    /// incremented.
    async fn claim(&self, agent_name: &str, goals: &[String])
        -> Result<Option<Mission>, QueueError>;

    /// Extend the lease of a RUNNING mission.
    async fn heartbeat(&self, mission_id: Uuid, lease_id: Uuid)
        -> Result<LeaseOutcome, QueueError>;

    /// Transition RUNNING → DONE, recording `result_meta` and clearing the
    /// lease.
    async fn complete(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        result_meta: Value,
    ) -> Result<LeaseOutcome, QueueError>;

    /// Report a failed attempt. Retryable failures with attempts remaining
    /// transition RUNNING → PENDING with a backoff; otherwise RUNNING →
    /// FAILED with `error_meta` recorded.
    async fn fail(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<LeaseOutcome, QueueError>;
}

// ── In-memory queue ──────────────────────────────────────────────────

/// In-memory mission queue for tests and single-process embedding.
///
/// Implements the full kernel semantics (dedup, lease fencing, backoff,
/// expiry reclamation) over a mutex-guarded vector. Not durable.
#[derive(Clone)]
pub struct MemoryMissionQueue {
    lease_ttl: Duration,
    missions: Arc<Mutex<Vec<Mission>>>,
}

impl MemoryMissionQueue {
    /// Create an empty queue with the default 60 s lease TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lease_ttl(DEFAULT_LEASE_TTL)
    }

    /// Create an empty queue with an explicit lease TTL.
    #[must_use]
    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        Self {
            lease_ttl,
            missions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fetch a mission snapshot by id.
    pub async fn get(&self, mission_id: Uuid) -> Option<Mission> {
        let missions = self.missions.lock().await;
        missions.iter().find(|m| m.mission_id == mission_id).cloned()
    }

    /// All missions, for assertions.
    pub async fn snapshot(&self) -> Vec<Mission> {
        self.missions.lock().await.clone()
    }

    /// Reclaim expired leases: every RUNNING mission whose lease has lapsed
    /// is treated as a retryable failure with error `"lease expired"`.
    /// Returns the number of reclaimed missions.
    pub async fn reclaim_expired(&self) -> usize {
        let now = Utc::now();
        let mut missions = self.missions.lock().await;
        let mut reclaimed = 0;

        for mission in missions.iter_mut() {
            if mission.status != MissionStatus::Running {
                continue;
            }
            let Some(expires_at) = mission.lease_expires_at else {
                continue;
            };
            if expires_at >= now {
                continue;
            }

            if mission.attempts < mission.max_attempts {
                mission.status = MissionStatus::Pending;
                mission.next_retry_at =
                    Some(now + chrono::Duration::from_std(retry_backoff(mission.attempts))
                        .unwrap_or_else(|_| chrono::Duration::zero()));
            } else {
                mission.status = MissionStatus::Failed;
                mission.error_meta = Some(serde_json::json!({ "error": "lease expired" }));
            }
            mission.lease_id = None;
            mission.lease_expires_at = None;
            mission.claimed_by = None;
            reclaimed += 1;
        }

        reclaimed
    }
}

#[async_trait::async_trait]
impl MissionQueue for MemoryMissionQueue {
    async fn submit(&self, request: MissionRequest) -> Result<SubmitOutcome, QueueError> {
        if request.goal.is_empty() {
            return Err(QueueError::InvalidRequest {
                reason: "goal must not be empty".to_owned(),
            });
        }

        let mut missions = self.missions.lock().await;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = missions
                .iter()
                .find(|m| !m.status.is_terminal() && m.idempotency_key.as_deref() == Some(key))
            {
                return Ok(SubmitOutcome::Deduped(existing.clone()));
            }
        }

        let mission = Mission::from_request(request, Utc::now());
        missions.push(mission.clone());
        Ok(SubmitOutcome::Created(mission))
    }

    async fn claim(
        &self,
        agent_name: &str,
        goals: &[String],
    ) -> Result<Option<Mission>, QueueError> {
        let now = Utc::now();
        let mut missions = self.missions.lock().await;

        let candidate = missions
            .iter_mut()
            .filter(|m| m.status == MissionStatus::Pending)
            .filter(|m| goals.is_empty() || goals.iter().any(|g| *g == m.goal))
            .filter(|m| m.next_retry_at.is_none_or(|at| at <= now))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.created_at.cmp(&a.created_at))
            });

        let Some(mission) = candidate else {
            return Ok(None);
        };

        mission.status = MissionStatus::Running;
        mission.lease_id = Some(Uuid::new_v4());
        mission.lease_expires_at = Some(
            now + chrono::Duration::from_std(self.lease_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        );
        mission.claimed_by = Some(agent_name.to_owned());
        mission.claimed_at = Some(now);
        mission.attempts += 1;
        mission.next_retry_at = None;

        Ok(Some(mission.clone()))
    }

    async fn heartbeat(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
    ) -> Result<LeaseOutcome, QueueError> {
        let now = Utc::now();
        let mut missions = self.missions.lock().await;
        let mission = missions
            .iter_mut()
            .find(|m| m.mission_id == mission_id)
            .ok_or(QueueError::NotFound { mission_id })?;

        if mission.status != MissionStatus::Running || mission.lease_id != Some(lease_id) {
            return Ok(LeaseOutcome::Stale);
        }

        mission.lease_expires_at = Some(
            now + chrono::Duration::from_std(self.lease_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        );
        mission.last_heartbeat_at = Some(now);
        Ok(LeaseOutcome::Ok)
    }

    async fn complete(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        result_meta: Value,
    ) -> Result<LeaseOutcome, QueueError> {
        let mut missions = self.missions.lock().await;
        let mission = missions
            .iter_mut()
            .find(|m| m.mission_id == mission_id)
            .ok_or(QueueError::NotFound { mission_id })?;

        if mission.status != MissionStatus::Running || mission.lease_id != Some(lease_id) {
            return Ok(LeaseOutcome::Stale);
        }

        mission.status = MissionStatus::Done;
        mission.result_meta = Some(result_meta);
        mission.lease_id = None;
        mission.lease_expires_at = None;
        Ok(LeaseOutcome::Ok)
    }

    async fn fail(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<LeaseOutcome, QueueError> {
        let now = Utc::now();
        let mut missions = self.missions.lock().await;
        let mission = missions
            .iter_mut()
            .find(|m| m.mission_id == mission_id)
            .ok_or(QueueError::NotFound { mission_id })?;

        if mission.status != MissionStatus::Running || mission.lease_id != Some(lease_id) {
            return Ok(LeaseOutcome::Stale);
        }

        if retryable && mission.attempts < mission.max_attempts {
            mission.status = MissionStatus::Pending;
            mission.next_retry_at =
                Some(now + chrono::Duration::from_std(retry_backoff(mission.attempts))
                    .unwrap_or_else(|_| chrono::Duration::zero()));
        } else {
            mission.status = MissionStatus::Failed;
            mission.error_meta = Some(serde_json::json!({ "error": error }));
        }
        mission.lease_id = None;
        mission.lease_expires_at = None;
        Ok(LeaseOutcome::Ok)
    }
}

impl Default for MemoryMissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryMissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMissionQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::Priority;

    fn request_with_key(goal: &str, key: &str) -> MissionRequest {
        MissionRequest {
            idempotency_key: Some(key.to_owned()),
            ..MissionRequest::new(goal)
        }
    }

    #[tokio::test]
    async fn submit_then_resubmit_dedupes() {
        let queue = MemoryMissionQueue::new();
        let first = queue
            .submit(request_with_key("generate-roast-report", "k1"))
            .await
            .unwrap();
        let second = queue
            .submit(request_with_key("generate-roast-report", "k1"))
            .await
            .unwrap();

        assert!(!first.is_deduped());
        assert!(second.is_deduped());
        assert_eq!(
            first.mission().mission_id,
            second.mission().mission_id
        );
        assert_eq!(queue.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn dedup_ignores_terminal_missions() {
        let queue = MemoryMissionQueue::new();
        let first = queue
            .submit(request_with_key("g", "k1"))
            .await
            .unwrap();
        let claimed = queue.claim("w1", &[]).await.unwrap().unwrap();
        queue
            .complete(claimed.mission_id, claimed.lease_id.unwrap(), Value::Null)
            .await
            .unwrap();

        let second = queue.submit(request_with_key("g", "k1")).await.unwrap();
        assert!(!second.is_deduped());
        assert_ne!(first.mission().mission_id, second.mission().mission_id);
    }

    #[tokio::test]
    async fn claim_sets_lease_and_attempts() {
        let queue = MemoryMissionQueue::new();
        queue.submit(MissionRequest::new("g")).await.unwrap();

        let mission = queue.claim("worker-1", &[]).await.unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Running);
        assert_eq!(mission.attempts, 1);
        assert!(mission.lease_id.is_some());
        assert!(mission.lease_expires_at.unwrap() > mission.claimed_at.unwrap());
        assert_eq!(mission.claimed_by.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn claim_respects_goal_filter() {
        let queue = MemoryMissionQueue::new();
        queue.submit(MissionRequest::new("other-goal")).await.unwrap();

        let none = queue
            .claim("w", &["generate-roast-report".to_owned()])
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn claim_prefers_higher_priority() {
        let queue = MemoryMissionQueue::new();
        queue.submit(MissionRequest::new("low")).await.unwrap();
        queue
            .submit(MissionRequest {
                priority: Priority::High,
                ..MissionRequest::new("high")
            })
            .await
            .unwrap();

        let first = queue.claim("w", &[]).await.unwrap().unwrap();
        assert_eq!(first.goal, "high");
    }

    #[tokio::test]
    async fn heartbeat_with_stale_lease_does_not_mutate() {
        let queue = MemoryMissionQueue::new();
        queue.submit(MissionRequest::new("g")).await.unwrap();
        let mission = queue.claim("w", &[]).await.unwrap().unwrap();

        let outcome = queue
            .heartbeat(mission.mission_id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, LeaseOutcome::Stale);

        let after = queue.get(mission.mission_id).await.unwrap();
        assert_eq!(after.lease_id, mission.lease_id);
        assert!(after.last_heartbeat_at.is_none());
    }

    #[tokio::test]
    async fn retryable_fail_requeues_with_backoff() {
        let queue = MemoryMissionQueue::new();
        queue.submit(MissionRequest::new("g")).await.unwrap();
        let mission = queue.claim("w", &[]).await.unwrap().unwrap();

        let outcome = queue
            .fail(mission.mission_id, mission.lease_id.unwrap(), "boom", true)
            .await
            .unwrap();
        assert_eq!(outcome, LeaseOutcome::Ok);

        let after = queue.get(mission.mission_id).await.unwrap();
        assert_eq!(after.status, MissionStatus::Pending);
        assert!(after.next_retry_at.is_some());
        assert!(after.lease_id.is_none());
    }

    #[tokio::test]
    async fn fail_with_attempts_exhausted_is_terminal() {
        let queue = MemoryMissionQueue::new();
        queue
            .submit(MissionRequest {
                max_attempts: Some(1),
                ..MissionRequest::new("g")
            })
            .await
            .unwrap();
        let mission = queue.claim("w", &[]).await.unwrap().unwrap();

        queue
            .fail(mission.mission_id, mission.lease_id.unwrap(), "boom", true)
            .await
            .unwrap();

        let after = queue.get(mission.mission_id).await.unwrap();
        assert_eq!(after.status, MissionStatus::Failed);
        assert!(after.error_meta.is_some());
    }

    #[tokio::test]
    async fn late_complete_after_reclaim_is_stale() {
        let queue = MemoryMissionQueue::with_lease_ttl(Duration::from_millis(0));
        queue.submit(MissionRequest::new("g")).await.unwrap();
        let mission = queue.claim("worker-a", &[]).await.unwrap().unwrap();
        let old_lease = mission.lease_id.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.reclaim_expired().await, 1);

        // Force the retry window open so worker B can claim immediately.
        {
            let mut missions = queue.missions.lock().await;
            missions[0].next_retry_at = None;
        }
        let reclaimed = queue.claim("worker-b", &[]).await.unwrap().unwrap();
        assert_eq!(reclaimed.attempts, 2);
        assert_ne!(reclaimed.lease_id.unwrap(), old_lease);

        let late = queue
            .complete(mission.mission_id, old_lease, Value::Null)
            .await
            .unwrap();
        assert_eq!(late, LeaseOutcome::Stale);
    }
}
