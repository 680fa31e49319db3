//! Governance persistence: the singleton governance state, circuit-breaker
//! rules and events, and the governor's periodic snapshots.
//!
//! The governance state is a single row (`id = 1`), last-write-wins with an
//! explicit `updated_at`. A circuit-breaker trip is applied in one
//! transaction: the event insert (deduplicated on `(rule, bucket)`) and the
//! state mutation commit together, so under concurrent checkers exactly one
//! event lands and the demotion always wins a racing governor write.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use roastd_core::circuit::{
    default_rules, CircuitAction, CircuitBreakerEvent, CircuitBreakerRule,
};
use roastd_core::governance::{GovernanceState, ScopeExpansionProposal};
use roastd_core::metrics::{AutonomyMetrics, IncidentCounts};
use roastd_core::readiness::ReadinessReport;

use crate::{from_json, to_json, to_millis, Db, StoreError};

const STATE_ROW_ID: i64 = 1;

/// SQL governance store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct GovernanceStore {
    db: Db,
}

impl GovernanceStore {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    // ── Governance state ─────────────────────────────────────────────

    /// Load the singleton state, bootstrapping `{L3, now, []}` when absent.
    pub async fn load_state(&self) -> Result<GovernanceState, StoreError> {
        let sql = self
            .db
            .normalize("SELECT payload FROM governance_state WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(STATE_ROW_ID)
            .fetch_optional(self.db.pool())
            .await?;

        if let Some(row) = row {
            let payload: String = row.try_get("payload")?;
            return from_json("payload", &payload);
        }

        let state = GovernanceState::initial(Utc::now());
        self.save_state(&state).await?;
        info!("governance state bootstrapped at L3");
        Ok(state)
    }

    /// Persist the singleton state (last write wins).
    pub async fn save_state(&self, state: &GovernanceState) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO governance_state (id, payload, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
        );
        sqlx::query(&sql)
            .bind(STATE_ROW_ID)
            .bind(to_json("payload", state)?)
            .bind(to_millis(Utc::now()))
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    // ── Circuit-breaker rules ────────────────────────────────────────

    /// All configured rules.
    pub async fn load_rules(&self) -> Result<Vec<CircuitBreakerRule>, StoreError> {
        let sql = self
            .db
            .normalize("SELECT payload FROM circuit_breaker_rules ORDER BY name ASC");
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter()
            .map(|r| {
                let payload: String = r.try_get("payload")?;
                from_json("payload", &payload)
            })
            .collect()
    }

    /// Fetch one rule by name.
    pub async fn get_rule(&self, name: &str) -> Result<Option<CircuitBreakerRule>, StoreError> {
        let sql = self
            .db
            .normalize("SELECT payload FROM circuit_breaker_rules WHERE name = ?");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            from_json("payload", &payload)
        })
        .transpose()
    }

    /// Insert or replace a rule.
    pub async fn upsert_rule(&self, rule: &CircuitBreakerRule) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO circuit_breaker_rules (name, enabled, payload)
             VALUES (?, ?, ?)
             ON CONFLICT (name) DO UPDATE SET
                 enabled = excluded.enabled,
                 payload = excluded.payload",
        );
        sqlx::query(&sql)
            .bind(&rule.name)
            .bind(i64::from(rule.enabled))
            .bind(to_json("payload", rule)?)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Seed the built-in rule set when no rules are configured.
    /// Returns the number of rules inserted.
    pub async fn seed_default_rules(&self) -> Result<usize, StoreError> {
        if !self.load_rules().await?.is_empty() {
            return Ok(0);
        }
        let rules = default_rules();
        for rule in &rules {
            self.upsert_rule(rule).await?;
        }
        info!(count = rules.len(), "default circuit-breaker rules seeded");
        Ok(rules.len())
    }

    // ── Circuit-breaker events ───────────────────────────────────────

    /// Apply a rule trip: write the event and the rule's state effect in one
    /// transaction.
    ///
    /// The event insert deduplicates on `(rule, bucket)`; when a concurrent
    /// checker already recorded this window's trip, nothing is written and
    /// `false` is returned. The state mutation (demotion, pause) commits with
    /// the winning insert, which is what lets a demotion beat any racing
    /// governor-cycle write.
    pub async fn apply_trip(
        &self,
        rule: &CircuitBreakerRule,
        bucket: i64,
        event: &CircuitBreakerEvent,
    ) -> Result<bool, StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let insert = self.db.normalize(
            "INSERT INTO circuit_breaker_events (
                id, rule, bucket, occurred_at, severity, resolved, payload
             ) VALUES (?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT (rule, bucket) DO NOTHING",
        );
        let inserted = sqlx::query(&insert)
            .bind(event.id.to_string())
            .bind(&event.rule)
            .bind(bucket)
            .bind(to_millis(event.timestamp))
            .bind(rule.alert_severity.to_string())
            .bind(to_json("payload", event)?)
            .execute(&mut *tx)
            .await?;

        if inserted.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(false);
        }

        // State effect, applied with the event in the same transaction.
        let state_sql = self
            .db
            .normalize("SELECT payload FROM governance_state WHERE id = ?");
        let state_row = sqlx::query(&state_sql)
            .bind(STATE_ROW_ID)
            .fetch_optional(&mut *tx)
            .await?;
        let mut state = match state_row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                from_json::<GovernanceState>("payload", &payload)?
            }
            None => GovernanceState::initial(Utc::now()),
        };

        match rule.action {
            CircuitAction::RevertToL3 => {
                state.demote(Utc::now());
                warn!(rule = %rule.name, "circuit breaker demoted autonomy to L3");
            }
            CircuitAction::PauseCommandType => {
                if let Some(command_type) = rule.command_type {
                    if !state.paused_command_types.contains(&command_type) {
                        state.paused_command_types.push(command_type);
                    }
                    warn!(
                        rule = %rule.name,
                        command_type = %command_type,
                        "circuit breaker paused command type"
                    );
                } else {
                    warn!(
                        rule = %rule.name,
                        "pause_command_type rule has no commandType; nothing paused"
                    );
                }
            }
            CircuitAction::AlertOnly => {}
        }

        let upsert = self.db.normalize(
            "INSERT INTO governance_state (id, payload, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
        );
        sqlx::query(&upsert)
            .bind(STATE_ROW_ID)
            .bind(to_json("payload", &state)?)
            .bind(to_millis(Utc::now()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Events not yet resolved, newest first.
    pub async fn unresolved_events(&self) -> Result<Vec<CircuitBreakerEvent>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM circuit_breaker_events WHERE resolved = 0
             ORDER BY occurred_at DESC",
        );
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter()
            .map(|r| {
                let payload: String = r.try_get("payload")?;
                from_json("payload", &payload)
            })
            .collect()
    }

    /// Recent events, newest first.
    pub async fn list_events(&self, limit: i64) -> Result<Vec<CircuitBreakerEvent>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM circuit_breaker_events
             ORDER BY occurred_at DESC LIMIT ?",
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.db.pool()).await?;
        rows.iter()
            .map(|r| {
                let payload: String = r.try_get("payload")?;
                from_json("payload", &payload)
            })
            .collect()
    }

    /// Mark an event resolved.
    pub async fn resolve_event(&self, id: Uuid) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "UPDATE circuit_breaker_events SET resolved = 1 WHERE id = ?",
        );
        let updated = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("circuit breaker event {id}"),
            });
        }
        Ok(())
    }

    /// Incident counts derived from circuit events in a window. Every event
    /// originates from autonomous operation, so `from_autonomous_actions`
    /// equals the total.
    pub async fn incident_counts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<IncidentCounts, StoreError> {
        let sql = self.db.normalize(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN severity = 'critical' THEN 1 ELSE 0 END), 0)
                    AS critical
             FROM circuit_breaker_events
             WHERE occurred_at >= ? AND occurred_at <= ?",
        );
        let row = sqlx::query(&sql)
            .bind(to_millis(start))
            .bind(to_millis(end))
            .fetch_one(self.db.pool())
            .await?;

        let total: i64 = row.try_get("total")?;
        let critical: i64 = row.try_get("critical")?;
        let total = u64::try_from(total).unwrap_or(0);
        Ok(IncidentCounts {
            total,
            critical: u64::try_from(critical).unwrap_or(0),
            from_autonomous_actions: total,
        })
    }

    // ── Governor snapshots ───────────────────────────────────────────

    /// Persist a metrics snapshot.
    pub async fn insert_metrics_snapshot(
        &self,
        metrics: &AutonomyMetrics,
    ) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO metrics_snapshots (id, collected_at, period_start, period_end, payload)
             VALUES (?, ?, ?, ?, ?)",
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(to_millis(Utc::now()))
            .bind(to_millis(metrics.period.start))
            .bind(to_millis(metrics.period.end))
            .bind(to_json("payload", metrics)?)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// The most recently collected metrics snapshot.
    pub async fn latest_metrics(&self) -> Result<Option<AutonomyMetrics>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM metrics_snapshots ORDER BY collected_at DESC LIMIT 1",
        );
        let row = sqlx::query(&sql).fetch_optional(self.db.pool()).await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            from_json("payload", &payload)
        })
        .transpose()
    }

    /// Persist a readiness assessment.
    pub async fn insert_readiness(&self, report: &ReadinessReport) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO readiness_assessments (id, assessed_at, payload) VALUES (?, ?, ?)",
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(to_millis(report.timestamp))
            .bind(to_json("payload", report)?)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// The most recent readiness assessment.
    pub async fn latest_readiness(&self) -> Result<Option<ReadinessReport>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM readiness_assessments ORDER BY assessed_at DESC LIMIT 1",
        );
        let row = sqlx::query(&sql).fetch_optional(self.db.pool()).await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            from_json("payload", &payload)
        })
        .transpose()
    }

    /// Record a generated scope expansion proposal (status `pending`).
    pub async fn insert_expansion_proposal(
        &self,
        proposal: &ScopeExpansionProposal,
    ) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO scope_expansion_proposals (proposal_id, created_at, status, payload)
             VALUES (?, ?, 'pending', ?)",
        );
        sqlx::query(&sql)
            .bind(proposal.proposal_id.to_string())
            .bind(to_millis(proposal.timestamp))
            .bind(to_json("payload", proposal)?)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Expansion proposals still awaiting a decision, oldest first.
    pub async fn pending_expansion_proposals(
        &self,
    ) -> Result<Vec<ScopeExpansionProposal>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM scope_expansion_proposals WHERE status = 'pending'
             ORDER BY created_at ASC",
        );
        let rows = sqlx::query(&sql).fetch_all(self.db.pool()).await?;
        rows.iter()
            .map(|r| {
                let payload: String = r.try_get("payload")?;
                from_json("payload", &payload)
            })
            .collect()
    }

    /// Decide a pending expansion proposal.
    pub async fn set_expansion_status(
        &self,
        proposal_id: Uuid,
        status: &str,
    ) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "UPDATE scope_expansion_proposals SET status = ? WHERE proposal_id = ?",
        );
        let updated = sqlx::query(&sql)
            .bind(status)
            .bind(proposal_id.to_string())
            .execute(self.db.pool())
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: format!("expansion proposal {proposal_id}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dialect;
    use roastd_core::circuit::{AlertSeverity, CircuitAction};
    use roastd_core::command::CommandType;
    use roastd_core::governance::AutonomyPhase;

    async fn store() -> GovernanceStore {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        GovernanceStore::new(db)
    }

    fn demotion_rule() -> CircuitBreakerRule {
        CircuitBreakerRule {
            name: "error-rate-demotion".to_owned(),
            enabled: true,
            condition: "errorRate > 0.05".to_owned(),
            window: "5m".to_owned(),
            action: CircuitAction::RevertToL3,
            alert_severity: AlertSeverity::Critical,
            command_type: None,
        }
    }

    fn event_for(rule: &CircuitBreakerRule) -> CircuitBreakerEvent {
        CircuitBreakerEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            rule: rule.name.clone(),
            metrics_snapshot: AutonomyMetrics::empty(Utc::now(), Utc::now()),
            action: rule.action,
            details: "errorRate 0.10 over 5m".to_owned(),
            resolved: false,
        }
    }

    #[tokio::test]
    async fn state_bootstraps_to_l3_once() {
        let store = store().await;
        let first = store.load_state().await.unwrap();
        assert_eq!(first.current_phase, AutonomyPhase::L3);
        assert!(first.command_whitelist.is_empty());

        let second = store.load_state().await.unwrap();
        assert_eq!(second.phase_start_date, first.phase_start_date);
    }

    #[tokio::test]
    async fn save_state_round_trips() {
        let store = store().await;
        let mut state = store.load_state().await.unwrap();
        state.current_phase = AutonomyPhase::L4;
        state.command_whitelist = vec![CommandType::SetPower, CommandType::SetFan];
        store.save_state(&state).await.unwrap();

        let loaded = store.load_state().await.unwrap();
        assert_eq!(loaded.current_phase, AutonomyPhase::L4);
        assert_eq!(loaded.command_whitelist.len(), 2);
    }

    #[tokio::test]
    async fn seeding_only_fills_an_empty_table() {
        let store = store().await;
        let seeded = store.seed_default_rules().await.unwrap();
        assert!(seeded > 0);
        assert_eq!(store.seed_default_rules().await.unwrap(), 0);
        assert_eq!(store.load_rules().await.unwrap().len(), seeded);
    }

    #[tokio::test]
    async fn trip_writes_event_and_demotes_in_one_step() {
        let store = store().await;
        let mut state = store.load_state().await.unwrap();
        state.current_phase = AutonomyPhase::L4;
        state.command_whitelist = vec![CommandType::SetPower];
        store.save_state(&state).await.unwrap();

        let rule = demotion_rule();
        let applied = store.apply_trip(&rule, 42, &event_for(&rule)).await.unwrap();
        assert!(applied);

        let after = store.load_state().await.unwrap();
        assert_eq!(after.current_phase, AutonomyPhase::L3);
        assert!(after.command_whitelist.is_empty());
        assert_eq!(store.unresolved_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_trips_in_one_bucket_write_one_event() {
        let store = store().await;
        let rule = demotion_rule();

        let first = store.apply_trip(&rule, 7, &event_for(&rule)).await.unwrap();
        let second = store.apply_trip(&rule, 7, &event_for(&rule)).await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(store.list_events(10).await.unwrap().len(), 1);

        // The next window bucket trips again.
        let third = store.apply_trip(&rule, 8, &event_for(&rule)).await.unwrap();
        assert!(third);
    }

    #[tokio::test]
    async fn pause_action_records_the_paused_type() {
        let store = store().await;
        let rule = CircuitBreakerRule {
            name: "pause-set-power".to_owned(),
            action: CircuitAction::PauseCommandType,
            command_type: Some(CommandType::SetPower),
            ..demotion_rule()
        };

        store.apply_trip(&rule, 1, &event_for(&rule)).await.unwrap();
        let state = store.load_state().await.unwrap();
        assert_eq!(state.paused_command_types, vec![CommandType::SetPower]);
        assert!(!state.agent_may_propose_unattended(CommandType::SetPower));
    }

    #[tokio::test]
    async fn resolve_event_clears_it_from_unresolved() {
        let store = store().await;
        let rule = demotion_rule();
        let event = event_for(&rule);
        store.apply_trip(&rule, 3, &event).await.unwrap();

        store.resolve_event(event.id).await.unwrap();
        assert!(store.unresolved_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn incident_counts_classify_severity() {
        let store = store().await;
        let critical = demotion_rule();
        store.apply_trip(&critical, 1, &event_for(&critical)).await.unwrap();

        let warning = CircuitBreakerRule {
            name: "warn-rule".to_owned(),
            alert_severity: AlertSeverity::Warning,
            action: CircuitAction::AlertOnly,
            ..demotion_rule()
        };
        store.apply_trip(&warning, 1, &event_for(&warning)).await.unwrap();

        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let incidents = store.incident_counts(start, end).await.unwrap();
        assert_eq!(incidents.total, 2);
        assert_eq!(incidents.critical, 1);
        assert_eq!(incidents.from_autonomous_actions, 2);
    }

    #[tokio::test]
    async fn snapshots_return_latest_first() {
        let store = store().await;
        assert!(store.latest_metrics().await.unwrap().is_none());

        let metrics = AutonomyMetrics::empty(Utc::now(), Utc::now());
        store.insert_metrics_snapshot(&metrics).await.unwrap();
        assert!(store.latest_metrics().await.unwrap().is_some());
    }
}
