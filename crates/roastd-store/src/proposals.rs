//! Command proposal persistence.
//!
//! Proposals are stored whole as JSON (audit log embedded) with the columns
//! the metrics collector aggregates broken out. The audit log is append-only
//! by construction: [`ProposalStore::save`] rewrites the document, and the
//! proposal service only ever pushes entries.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use roastd_core::command::{CommandProposal, ProposalStatus};
use roastd_core::metrics::{CommandCounts, SafetyCounts};

use crate::{from_json, to_json, to_millis, Db, StoreError};

/// SQL command proposal store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ProposalStore {
    db: Db,
}

impl ProposalStore {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a fresh proposal.
    pub async fn insert(&self, proposal: &CommandProposal) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO command_proposals (
                proposal_id, machine_id, command_type, proposed_by, status,
                approval_required, proposed_at, execution_completed_at,
                rejection_reason, rolled_back, payload
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        );
        sqlx::query(&sql)
            .bind(proposal.proposal_id.to_string())
            .bind(&proposal.command.machine_id)
            .bind(proposal.command.command_type.to_string())
            .bind(proposal.proposed_by.to_string())
            .bind(proposal.status.to_string())
            .bind(i64::from(proposal.approval_required))
            .bind(to_millis(proposal.proposed_at))
            .bind(proposal.execution_completed_at.map(to_millis))
            .bind(proposal.rejection_reason.as_deref())
            .bind(to_json("payload", proposal)?)
            .execute(self.db.pool())
            .await?;

        debug!(
            proposal_id = %proposal.proposal_id,
            command_type = %proposal.command.command_type,
            machine_id = %proposal.command.machine_id,
            "command proposal recorded"
        );
        Ok(())
    }

    /// Persist a proposal after a transition.
    pub async fn save(&self, proposal: &CommandProposal) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "UPDATE command_proposals
             SET status = ?,
                 approval_required = ?,
                 execution_completed_at = ?,
                 rejection_reason = ?,
                 payload = ?
             WHERE proposal_id = ?",
        );
        let updated = sqlx::query(&sql)
            .bind(proposal.status.to_string())
            .bind(i64::from(proposal.approval_required))
            .bind(proposal.execution_completed_at.map(to_millis))
            .bind(proposal.rejection_reason.as_deref())
            .bind(to_json("payload", proposal)?)
            .bind(proposal.proposal_id.to_string())
            .execute(self.db.pool())
            .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("proposal {}", proposal.proposal_id),
            });
        }
        Ok(())
    }

    /// Fetch a proposal by id.
    pub async fn get(&self, proposal_id: Uuid) -> Result<Option<CommandProposal>, StoreError> {
        let sql = self
            .db
            .normalize("SELECT payload FROM command_proposals WHERE proposal_id = ?");
        let row = sqlx::query(&sql)
            .bind(proposal_id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            from_json("payload", &payload)
        })
        .transpose()
    }

    /// All proposals currently waiting on approval, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<CommandProposal>, StoreError> {
        self.list_by_status(ProposalStatus::PendingApproval).await
    }

    /// Proposals by status, oldest first.
    pub async fn list_by_status(
        &self,
        status: ProposalStatus,
    ) -> Result<Vec<CommandProposal>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM command_proposals WHERE status = ?
             ORDER BY proposed_at ASC",
        );
        let rows = sqlx::query(&sql)
            .bind(status.to_string())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|r| {
                let payload: String = r.try_get("payload")?;
                from_json("payload", &payload)
            })
            .collect()
    }

    /// Pending proposals whose approval window has lapsed.
    pub async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<CommandProposal>, StoreError> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .filter(|p| p.approval_overdue(now))
            .collect())
    }

    /// Mark a completed command as rolled back (operator/incident tooling).
    pub async fn mark_rolled_back(&self, proposal_id: Uuid) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "UPDATE command_proposals SET rolled_back = 1 WHERE proposal_id = ?",
        );
        let updated = sqlx::query(&sql)
            .bind(proposal_id.to_string())
            .execute(self.db.pool())
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("proposal {proposal_id}"),
            });
        }
        Ok(())
    }

    /// Aggregate command and safety counts over `[start, end]`.
    ///
    /// `approved` counts proposals that passed the approval gate (anything
    /// past `PROPOSED`/`PENDING_APPROVAL` that was not rejected);
    /// `succeeded`/`failed` count terminal execution outcomes. Safety
    /// counters pattern-match rejection reasons and the ABORT command type.
    pub async fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(CommandCounts, SafetyCounts), StoreError> {
        let sql = self.db.normalize(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status NOT IN ('PROPOSED', 'PENDING_APPROVAL', 'REJECTED')
                    THEN 1 ELSE 0 END), 0) AS approved,
                COALESCE(SUM(CASE WHEN status = 'REJECTED' THEN 1 ELSE 0 END), 0) AS rejected,
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0) AS succeeded,
                COALESCE(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN rolled_back <> 0 THEN 1 ELSE 0 END), 0) AS rolled_back,
                COALESCE(SUM(CASE WHEN status = 'REJECTED'
                    AND LOWER(COALESCE(rejection_reason, '')) LIKE '%constraint%'
                    THEN 1 ELSE 0 END), 0) AS constraint_violations,
                COALESCE(SUM(CASE WHEN command_type = 'ABORT' THEN 1 ELSE 0 END), 0)
                    AS emergency_aborts,
                COALESCE(SUM(CASE WHEN status = 'REJECTED'
                    AND (LOWER(COALESCE(rejection_reason, '')) LIKE '%safety%'
                         OR LOWER(COALESCE(rejection_reason, '')) LIKE '%gate%')
                    THEN 1 ELSE 0 END), 0) AS safety_gate_triggers
             FROM command_proposals
             WHERE proposed_at >= ? AND proposed_at <= ?",
        );
        let row = sqlx::query(&sql)
            .bind(to_millis(start))
            .bind(to_millis(end))
            .fetch_one(self.db.pool())
            .await?;

        let get = |name: &str| -> Result<u64, StoreError> {
            let v: i64 = row.try_get(name)?;
            Ok(u64::try_from(v).unwrap_or(0))
        };

        let total = get("total")?;
        let counts = CommandCounts {
            total,
            proposed: total,
            approved: get("approved")?,
            rejected: get("rejected")?,
            succeeded: get("succeeded")?,
            failed: get("failed")?,
            rolled_back: get("rolled_back")?,
        };
        let safety = SafetyCounts {
            constraint_violations: get("constraint_violations")?,
            emergency_aborts: get("emergency_aborts")?,
            safety_gate_triggers: get("safety_gate_triggers")?,
        };
        Ok((counts, safety))
    }
}
