//! The mission kernel: a durable queue with leased dequeue.
//!
//! All mutations go through the verb set (`submit`, `claim`, `heartbeat`,
//! `complete`, `fail`, `reclaim_expired`), one transaction per call. Claim
//! and every lease-fenced update use compare-and-set `UPDATE` predicates on
//! `(status, lease_id)` so concurrent workers and reclaimers cannot double
//! -apply a transition on either dialect.
//!
//! The only legal status edges:
//! `PENDING → RUNNING` (claim), `RUNNING → PENDING` (retryable fail or lease
//! expiry with attempts left), `RUNNING → DONE` (complete), and
//! `RUNNING → FAILED` (non-retryable fail or attempts exhausted).

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roastd_core::mission::{retry_backoff, Mission, MissionRequest, MissionStatus, Priority,
    DEFAULT_LEASE_TTL, DEFAULT_MAX_ATTEMPTS};
use roastd_core::queue::{LeaseOutcome, MissionQueue, SubmitOutcome};
use roastd_core::QueueError;

use crate::{from_json, from_millis, opt_millis, parse_uuid, to_json, to_millis, Db, StoreError};

/// SQL mission store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MissionStore {
    db: Db,
    lease_ttl: Duration,
}

impl MissionStore {
    /// A store with the default 60 s lease TTL.
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self::with_lease_ttl(db, DEFAULT_LEASE_TTL)
    }

    #[must_use]
    pub fn with_lease_ttl(db: Db, lease_ttl: Duration) -> Self {
        Self { db, lease_ttl }
    }

    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Enqueue a mission, deduplicating on `idempotency_key` among
    /// non-terminal missions.
    pub async fn submit_mission(
        &self,
        request: MissionRequest,
    ) -> Result<SubmitOutcome, StoreError> {
        if request.goal.is_empty() {
            return Err(StoreError::Config {
                reason: "mission goal must not be empty".to_owned(),
            });
        }

        let mut tx = self.db.pool().begin().await?;

        if let Some(key) = &request.idempotency_key {
            let sql = self.db.normalize(
                "SELECT * FROM missions
                 WHERE idempotency_key = ? AND status IN ('PENDING', 'RUNNING')",
            );
            if let Some(row) = sqlx::query(&sql).bind(key).fetch_optional(&mut *tx).await? {
                let existing = mission_from_row(&row)?;
                tx.commit().await?;
                debug!(
                    idempotency_key = %key,
                    mission_id = %existing.mission_id,
                    "mission submit deduped"
                );
                return Ok(SubmitOutcome::Deduped(existing));
            }
        }

        let mission = Mission::from_request(request, Utc::now());
        let sql = self.db.normalize(
            "INSERT INTO missions (
                mission_id, goal, params, subject_id, priority, constraints,
                context, idempotency_key, created_at, status, attempts,
                max_attempts
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        sqlx::query(&sql)
            .bind(mission.mission_id.to_string())
            .bind(&mission.goal)
            .bind(to_json("params", &mission.params)?)
            .bind(mission.subject_id.as_deref())
            .bind(priority_to_i64(mission.priority))
            .bind(to_json("constraints", &mission.constraints)?)
            .bind(to_json("context", &mission.context)?)
            .bind(mission.idempotency_key.as_deref())
            .bind(to_millis(mission.created_at))
            .bind(mission.status.to_string())
            .bind(i64::from(mission.attempts))
            .bind(i64::from(mission.max_attempts))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            mission_id = %mission.mission_id,
            goal = %mission.goal,
            "mission created"
        );
        Ok(SubmitOutcome::Created(mission))
    }

    /// Atomically claim one claimable mission.
    ///
    /// Selects a small batch of candidates in priority/FIFO order, then
    /// races a compare-and-set `UPDATE ... WHERE status = 'PENDING'` per
    /// candidate. The first CAS that lands wins; losing a candidate to a
    /// concurrent claimer just moves on to the next.
    pub async fn claim_mission(
        &self,
        agent_name: &str,
        goals: &[String],
    ) -> Result<Option<Mission>, StoreError> {
        let now = Utc::now();
        let now_ms = to_millis(now);
        let lease_expires_ms = to_millis(now + chrono_duration(self.lease_ttl));

        let mut select = String::from(
            "SELECT mission_id FROM missions
             WHERE status = 'PENDING'
               AND (next_retry_at IS NULL OR next_retry_at <= ?)",
        );
        if !goals.is_empty() {
            let placeholders = vec!["?"; goals.len()].join(", ");
            select.push_str(&format!(" AND goal IN ({placeholders})"));
        }
        select.push_str(" ORDER BY priority DESC, created_at ASC LIMIT 8");
        let select = self.db.normalize(&select);

        let mut query = sqlx::query(&select).bind(now_ms);
        for goal in goals {
            query = query.bind(goal);
        }
        let candidates = query.fetch_all(self.db.pool()).await?;

        let cas = self.db.normalize(
            "UPDATE missions
             SET status = 'RUNNING',
                 lease_id = ?,
                 lease_expires_at = ?,
                 claimed_by = ?,
                 claimed_at = ?,
                 attempts = attempts + 1,
                 next_retry_at = NULL
             WHERE mission_id = ? AND status = 'PENDING'",
        );

        for row in candidates {
            let mission_id: String = row.try_get("mission_id")?;
            let lease_id = Uuid::new_v4();

            let updated = sqlx::query(&cas)
                .bind(lease_id.to_string())
                .bind(lease_expires_ms)
                .bind(agent_name)
                .bind(now_ms)
                .bind(&mission_id)
                .execute(self.db.pool())
                .await?;

            if updated.rows_affected() == 1 {
                let mission = self
                    .fetch(&mission_id)
                    .await?
                    .ok_or_else(|| StoreError::Corrupt {
                        reason: format!("claimed mission vanished: {mission_id}"),
                    })?;
                debug!(
                    mission_id = %mission_id,
                    agent = %agent_name,
                    attempt = mission.attempts,
                    "mission claimed"
                );
                return Ok(Some(mission));
            }
        }

        Ok(None)
    }

    /// Extend the lease of a RUNNING mission.
    pub async fn heartbeat_mission(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
    ) -> Result<LeaseOutcome, StoreError> {
        let now = Utc::now();
        let sql = self.db.normalize(
            "UPDATE missions
             SET lease_expires_at = ?, last_heartbeat_at = ?
             WHERE mission_id = ? AND lease_id = ? AND status = 'RUNNING'",
        );
        let updated = sqlx::query(&sql)
            .bind(to_millis(now + chrono_duration(self.lease_ttl)))
            .bind(to_millis(now))
            .bind(mission_id.to_string())
            .bind(lease_id.to_string())
            .execute(self.db.pool())
            .await?;

        if updated.rows_affected() == 1 {
            Ok(LeaseOutcome::Ok)
        } else {
            self.stale_or_missing(mission_id).await
        }
    }

    /// Transition RUNNING → DONE.
    pub async fn complete_mission(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        result_meta: Value,
    ) -> Result<LeaseOutcome, StoreError> {
        let sql = self.db.normalize(
            "UPDATE missions
             SET status = 'DONE',
                 result_meta = ?,
                 lease_id = NULL,
                 lease_expires_at = NULL
             WHERE mission_id = ? AND lease_id = ? AND status = 'RUNNING'",
        );
        let updated = sqlx::query(&sql)
            .bind(to_json("result_meta", &result_meta)?)
            .bind(mission_id.to_string())
            .bind(lease_id.to_string())
            .execute(self.db.pool())
            .await?;

        if updated.rows_affected() == 1 {
            info!(mission_id = %mission_id, "mission completed");
            Ok(LeaseOutcome::Ok)
        } else {
            self.stale_or_missing(mission_id).await
        }
    }

    /// Report a failed attempt; requeue with backoff or finalize FAILED.
    pub async fn fail_mission(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<LeaseOutcome, StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let sql = self.db.normalize(
            "SELECT attempts, max_attempts, status, lease_id
             FROM missions WHERE mission_id = ?",
        );
        let Some(row) = sqlx::query(&sql)
            .bind(mission_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Err(StoreError::NotFound {
                what: format!("mission {mission_id}"),
            });
        };

        let attempts: i64 = row.try_get("attempts")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let status: String = row.try_get("status")?;
        let current_lease: Option<String> = row.try_get("lease_id")?;

        if status != "RUNNING" || current_lease != Some(lease_id.to_string()) {
            tx.commit().await?;
            return Ok(LeaseOutcome::Stale);
        }

        let updated = if retryable && attempts < max_attempts {
            let attempts_u32 = u32::try_from(attempts).unwrap_or(u32::MAX);
            let delay = retry_backoff(attempts_u32);
            let next_retry = Utc::now() + chrono_duration(delay);
            let sql = self.db.normalize(
                "UPDATE missions
                 SET status = 'PENDING',
                     next_retry_at = ?,
                     lease_id = NULL,
                     lease_expires_at = NULL
                 WHERE mission_id = ? AND lease_id = ? AND status = 'RUNNING'",
            );
            debug!(
                mission_id = %mission_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "mission failed, retry scheduled"
            );
            sqlx::query(&sql)
                .bind(to_millis(next_retry))
                .bind(mission_id.to_string())
                .bind(lease_id.to_string())
                .execute(&mut *tx)
                .await?
        } else {
            let error_meta = serde_json::json!({ "error": error, "retryable": retryable });
            let sql = self.db.normalize(
                "UPDATE missions
                 SET status = 'FAILED',
                     error_meta = ?,
                     lease_id = NULL,
                     lease_expires_at = NULL
                 WHERE mission_id = ? AND lease_id = ? AND status = 'RUNNING'",
            );
            warn!(
                mission_id = %mission_id,
                attempts,
                error = %error,
                "mission finalized as failed"
            );
            sqlx::query(&sql)
                .bind(to_json("error_meta", &error_meta)?)
                .bind(mission_id.to_string())
                .bind(lease_id.to_string())
                .execute(&mut *tx)
                .await?
        };

        tx.commit().await?;
        if updated.rows_affected() == 1 {
            Ok(LeaseOutcome::Ok)
        } else {
            Ok(LeaseOutcome::Stale)
        }
    }

    /// Reclaim every RUNNING mission whose lease has lapsed, treating each
    /// as a retryable failure with error `"lease expired"`. Idempotent;
    /// returns the number reclaimed.
    pub async fn reclaim_expired(&self) -> Result<u64, StoreError> {
        let now_ms = to_millis(Utc::now());
        let sql = self.db.normalize(
            "SELECT mission_id, lease_id FROM missions
             WHERE status = 'RUNNING'
               AND lease_expires_at IS NOT NULL
               AND lease_expires_at < ?
             LIMIT 100",
        );
        let rows = sqlx::query(&sql).bind(now_ms).fetch_all(self.db.pool()).await?;

        let mut reclaimed = 0u64;
        for row in rows {
            let mission_id: String = row.try_get("mission_id")?;
            let lease: Option<String> = row.try_get("lease_id")?;
            let (Ok(mission_id), Some(lease)) = (mission_id.parse::<Uuid>(), lease) else {
                continue;
            };
            let Ok(lease_id) = lease.parse::<Uuid>() else {
                continue;
            };

            match self
                .fail_mission(mission_id, lease_id, "lease expired", true)
                .await
            {
                Ok(LeaseOutcome::Ok) => reclaimed += 1,
                // Lost the race to a heartbeat or another reclaimer.
                Ok(LeaseOutcome::Stale) => {}
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if reclaimed > 0 {
            info!(reclaimed, "expired mission leases reclaimed");
        }
        Ok(reclaimed)
    }

    /// Fetch a mission by id.
    pub async fn get(&self, mission_id: Uuid) -> Result<Option<Mission>, StoreError> {
        self.fetch(&mission_id.to_string()).await
    }

    /// List missions, newest first, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<MissionStatus>,
        limit: i64,
    ) -> Result<Vec<Mission>, StoreError> {
        let rows = if let Some(status) = status {
            let sql = self.db.normalize(
                "SELECT * FROM missions WHERE status = ?
                 ORDER BY created_at DESC LIMIT ?",
            );
            sqlx::query(&sql)
                .bind(status.to_string())
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
        } else {
            let sql = self
                .db
                .normalize("SELECT * FROM missions ORDER BY created_at DESC LIMIT ?");
            sqlx::query(&sql).bind(limit).fetch_all(self.db.pool()).await?
        };

        rows.iter().map(mission_from_row).collect()
    }

    async fn fetch(&self, mission_id: &str) -> Result<Option<Mission>, StoreError> {
        let sql = self.db.normalize("SELECT * FROM missions WHERE mission_id = ?");
        let row = sqlx::query(&sql)
            .bind(mission_id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(mission_from_row).transpose()
    }

    async fn stale_or_missing(&self, mission_id: Uuid) -> Result<LeaseOutcome, StoreError> {
        if self.fetch(&mission_id.to_string()).await?.is_some() {
            Ok(LeaseOutcome::Stale)
        } else {
            Err(StoreError::NotFound {
                what: format!("mission {mission_id}"),
            })
        }
    }
}

#[async_trait::async_trait]
impl MissionQueue for MissionStore {
    async fn submit(&self, request: MissionRequest) -> Result<SubmitOutcome, QueueError> {
        self.submit_mission(request).await.map_err(Into::into)
    }

    async fn claim(
        &self,
        agent_name: &str,
        goals: &[String],
    ) -> Result<Option<Mission>, QueueError> {
        self.claim_mission(agent_name, goals).await.map_err(Into::into)
    }

    async fn heartbeat(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
    ) -> Result<LeaseOutcome, QueueError> {
        self.heartbeat_mission(mission_id, lease_id)
            .await
            .map_err(|e| not_found_or_backend(mission_id, e))
    }

    async fn complete(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        result_meta: Value,
    ) -> Result<LeaseOutcome, QueueError> {
        self.complete_mission(mission_id, lease_id, result_meta)
            .await
            .map_err(|e| not_found_or_backend(mission_id, e))
    }

    async fn fail(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<LeaseOutcome, QueueError> {
        self.fail_mission(mission_id, lease_id, error, retryable)
            .await
            .map_err(|e| not_found_or_backend(mission_id, e))
    }
}

fn not_found_or_backend(mission_id: Uuid, err: StoreError) -> QueueError {
    match err {
        StoreError::NotFound { .. } => QueueError::NotFound { mission_id },
        other => other.into(),
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

fn priority_to_i64(priority: Priority) -> i64 {
    match priority {
        Priority::Low => 0,
        Priority::Medium => 1,
        Priority::High => 2,
    }
}

fn priority_from_i64(value: i64) -> Result<Priority, StoreError> {
    match value {
        0 => Ok(Priority::Low),
        1 => Ok(Priority::Medium),
        2 => Ok(Priority::High),
        other => Err(StoreError::Corrupt {
            reason: format!("bad priority: {other}"),
        }),
    }
}

fn status_from_str(value: &str) -> Result<MissionStatus, StoreError> {
    match value {
        "PENDING" => Ok(MissionStatus::Pending),
        "RUNNING" => Ok(MissionStatus::Running),
        "DONE" => Ok(MissionStatus::Done),
        "FAILED" => Ok(MissionStatus::Failed),
        other => Err(StoreError::Corrupt {
            reason: format!("bad mission status: {other}"),
        }),
    }
}

fn mission_from_row(row: &AnyRow) -> Result<Mission, StoreError> {
    let mission_id: String = row.try_get("mission_id")?;
    let params: String = row.try_get("params")?;
    let constraints: String = row.try_get("constraints")?;
    let context: String = row.try_get("context")?;
    let status: String = row.try_get("status")?;
    let lease_id: Option<String> = row.try_get("lease_id")?;
    let result_meta: Option<String> = row.try_get("result_meta")?;
    let error_meta: Option<String> = row.try_get("error_meta")?;
    let attempts: i64 = row.try_get("attempts")?;
    let max_attempts: i64 = row.try_get("max_attempts")?;

    Ok(Mission {
        mission_id: parse_uuid("mission_id", &mission_id)?,
        goal: row.try_get("goal")?,
        params: from_json("params", &params)?,
        subject_id: row.try_get("subject_id")?,
        priority: priority_from_i64(row.try_get("priority")?)?,
        constraints: from_json("constraints", &constraints)?,
        context: from_json("context", &context)?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        status: status_from_str(&status)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        max_attempts: u32::try_from(max_attempts).unwrap_or(DEFAULT_MAX_ATTEMPTS),
        lease_id: lease_id
            .as_deref()
            .map(|s| parse_uuid("lease_id", s))
            .transpose()?,
        lease_expires_at: opt_millis(row.try_get("lease_expires_at")?)?,
        last_heartbeat_at: opt_millis(row.try_get("last_heartbeat_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: opt_millis(row.try_get("claimed_at")?)?,
        next_retry_at: opt_millis(row.try_get("next_retry_at")?)?,
        result_meta: result_meta
            .as_deref()
            .map(|s| from_json("result_meta", s))
            .transpose()?,
        error_meta: error_meta
            .as_deref()
            .map(|s| from_json("error_meta", s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dialect;

    async fn store() -> MissionStore {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        MissionStore::new(db)
    }

    fn request(goal: &str, key: Option<&str>) -> MissionRequest {
        MissionRequest {
            params: serde_json::json!({ "sessionId": "sess-1" }),
            idempotency_key: key.map(str::to_owned),
            ..MissionRequest::new(goal)
        }
    }

    #[tokio::test]
    async fn submit_roundtrips_the_record() {
        let store = store().await;
        let outcome = store
            .submit_mission(request("generate-roast-report", Some("k1")))
            .await
            .unwrap();
        let mission = outcome.mission();

        let loaded = store.get(mission.mission_id).await.unwrap().unwrap();
        assert_eq!(loaded.goal, "generate-roast-report");
        assert_eq!(loaded.idempotency_key.as_deref(), Some("k1"));
        assert_eq!(loaded.status, MissionStatus::Pending);
        assert_eq!(loaded.session_id(), Some("sess-1"));
    }

    #[tokio::test]
    async fn duplicate_submit_is_deduped_and_store_unchanged() {
        let store = store().await;
        store
            .submit_mission(request("g", Some("k1")))
            .await
            .unwrap();
        let second = store
            .submit_mission(request("g", Some("k1")))
            .await
            .unwrap();

        assert!(second.is_deduped());
        assert_eq!(store.list(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dedup_releases_after_terminal_state() {
        let store = store().await;
        store.submit_mission(request("g", Some("k1"))).await.unwrap();
        let claimed = store.claim_mission("w", &[]).await.unwrap().unwrap();
        store
            .complete_mission(claimed.mission_id, claimed.lease_id.unwrap(), Value::Null)
            .await
            .unwrap();

        let resubmit = store.submit_mission(request("g", Some("k1"))).await.unwrap();
        assert!(!resubmit.is_deduped());
        assert_eq!(store.list(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_fifo() {
        let store = store().await;
        store.submit_mission(request("first-low", None)).await.unwrap();
        store
            .submit_mission(MissionRequest {
                priority: Priority::High,
                ..MissionRequest::new("high")
            })
            .await
            .unwrap();

        let claimed = store.claim_mission("w", &[]).await.unwrap().unwrap();
        assert_eq!(claimed.goal, "high");
        assert_eq!(claimed.status, MissionStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.lease_id.is_some());
        assert!(claimed.lease_expires_at.unwrap() > claimed.claimed_at.unwrap());
    }

    #[tokio::test]
    async fn claim_filters_by_goal() {
        let store = store().await;
        store.submit_mission(request("other", None)).await.unwrap();

        let none = store
            .claim_mission("w", &["generate-roast-report".to_owned()])
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn claimed_mission_is_not_claimable_again() {
        let store = store().await;
        store.submit_mission(request("g", None)).await.unwrap();
        store.claim_mission("a", &[]).await.unwrap().unwrap();
        assert!(store.claim_mission("b", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn heartbeat_extends_lease_and_rejects_stale() {
        let store = store().await;
        store.submit_mission(request("g", None)).await.unwrap();
        let claimed = store.claim_mission("w", &[]).await.unwrap().unwrap();

        let ok = store
            .heartbeat_mission(claimed.mission_id, claimed.lease_id.unwrap())
            .await
            .unwrap();
        assert_eq!(ok, LeaseOutcome::Ok);

        let stale = store
            .heartbeat_mission(claimed.mission_id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(stale, LeaseOutcome::Stale);

        let after = store.get(claimed.mission_id).await.unwrap().unwrap();
        assert!(after.last_heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_mission_is_not_found() {
        let store = store().await;
        let err = store
            .heartbeat_mission(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn retryable_fail_requeues_with_future_retry() {
        let store = store().await;
        store.submit_mission(request("g", None)).await.unwrap();
        let claimed = store.claim_mission("w", &[]).await.unwrap().unwrap();

        store
            .fail_mission(claimed.mission_id, claimed.lease_id.unwrap(), "ECONNRESET", true)
            .await
            .unwrap();

        let after = store.get(claimed.mission_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Pending);
        assert!(after.lease_id.is_none());
        assert!(after.next_retry_at.is_some());
        assert_eq!(after.attempts, 1);
    }

    #[tokio::test]
    async fn retryable_fail_at_max_attempts_finalizes_failed() {
        let store = store().await;
        store
            .submit_mission(MissionRequest {
                max_attempts: Some(1),
                ..MissionRequest::new("g")
            })
            .await
            .unwrap();
        let claimed = store.claim_mission("w", &[]).await.unwrap().unwrap();

        store
            .fail_mission(claimed.mission_id, claimed.lease_id.unwrap(), "timeout", true)
            .await
            .unwrap();

        let after = store.get(claimed.mission_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Failed);
        assert_eq!(after.error_meta.unwrap()["error"], "timeout");
    }

    #[tokio::test]
    async fn non_retryable_fail_is_terminal_immediately() {
        let store = store().await;
        store.submit_mission(request("g", None)).await.unwrap();
        let claimed = store.claim_mission("w", &[]).await.unwrap().unwrap();

        store
            .fail_mission(claimed.mission_id, claimed.lease_id.unwrap(), "bad params", false)
            .await
            .unwrap();

        let after = store.get(claimed.mission_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Failed);
    }

    #[tokio::test]
    async fn lease_expiry_reclamation_reissues_and_stales_old_lease() {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = MissionStore::with_lease_ttl(db, Duration::from_millis(0));

        store.submit_mission(request("g", None)).await.unwrap();
        let claimed = store.claim_mission("worker-a", &[]).await.unwrap().unwrap();
        let old_lease = claimed.lease_id.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.reclaim_expired().await.unwrap(), 1);

        let after = store.get(claimed.mission_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Pending);
        assert_eq!(after.attempts, 1);

        // Open the retry window so worker B can claim immediately.
        let sql = store.db.normalize("UPDATE missions SET next_retry_at = NULL");
        sqlx::query(&sql).execute(store.db.pool()).await.unwrap();

        let reclaimed = store.claim_mission("worker-b", &[]).await.unwrap().unwrap();
        assert_eq!(reclaimed.attempts, 2);
        assert_ne!(reclaimed.lease_id.unwrap(), old_lease);

        let late = store
            .complete_mission(claimed.mission_id, old_lease, Value::Null)
            .await
            .unwrap();
        assert_eq!(late, LeaseOutcome::Stale);
    }

    #[tokio::test]
    async fn reclaim_is_idempotent() {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = MissionStore::with_lease_ttl(db, Duration::from_millis(0));

        store.submit_mission(request("g", None)).await.unwrap();
        store.claim_mission("w", &[]).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.reclaim_expired().await.unwrap(), 1);
        assert_eq!(store.reclaim_expired().await.unwrap(), 0);
    }
}
