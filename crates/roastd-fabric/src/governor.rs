//! The autonomy governor.
//!
//! Three periodic concerns share this service:
//!
//! - **Metrics collection** — aggregate the proposal table and circuit
//!   events over a window into an [`AutonomyMetrics`] record.
//! - **Circuit breaker** — evaluate every enabled rule against its trailing
//!   window; a trip durably records an event, applies the rule's action
//!   (demotion, pause, alert-only), and pushes a severity-tagged alert.
//! - **Weekly cycle** — collect seven-day metrics, score readiness, and
//!   propose the next scope expansion when the fleet has earned it.
//!
//! The loops themselves live in the server binary; everything here is a
//! plain async call so tests can drive ticks directly.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use roastd_core::circuit::{
    parse_window, window_bucket, AlertSeverity, CircuitBreakerEvent, Condition,
};
use roastd_core::governance::{
    assess_risk, next_expansion, ExpansionPlan, ExpansionRationale, GovernanceState,
    RiskAssessment, RiskLevel, ScopeExpansionProposal,
};
use roastd_core::metrics::{AutonomyMetrics, CommandRates, MetricsPeriod};
use roastd_core::readiness::{assess, ReadinessReport};
use roastd_store::{GovernanceStore, ProposalStore, StoreError};

/// The metrics window of the weekly cycle.
const CYCLE_WINDOW_DAYS: i64 = 7;

/// Errors from the governor.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("expansion proposal not found: {proposal_id}")]
    ProposalNotFound { proposal_id: Uuid },
}

/// Receives severity-tagged alerts on circuit-breaker trips.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, severity: AlertSeverity, rule: &str, details: &str);
}

/// The default sink: structured log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait::async_trait]
impl AlertSink for TracingAlertSink {
    async fn alert(&self, severity: AlertSeverity, rule: &str, details: &str) {
        warn!(severity = %severity, rule = %rule, details = %details, "circuit breaker alert");
    }
}

/// Output of one governor cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub metrics: AutonomyMetrics,
    pub readiness: ReadinessReport,
    pub unresolved_events: usize,
    pub pending_proposals: usize,
    pub expansion_proposal: Option<ScopeExpansionProposal>,
}

/// The autonomy governor service.
pub struct Governor {
    proposals: ProposalStore,
    governance: GovernanceStore,
    alerts: Arc<dyn AlertSink>,
    proposer: String,
}

impl Governor {
    #[must_use]
    pub fn new(
        proposals: ProposalStore,
        governance: GovernanceStore,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            proposals,
            governance,
            alerts,
            proposer: "autonomy-governor".to_owned(),
        }
    }

    /// Aggregate metrics over `[start, end]`.
    pub async fn collect_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AutonomyMetrics, GovernorError> {
        let (commands, safety) = self.proposals.aggregate(start, end).await?;
        let incidents = self.governance.incident_counts(start, end).await?;
        Ok(AutonomyMetrics {
            period: MetricsPeriod { start, end },
            rates: CommandRates::derive(&commands),
            commands,
            incidents,
            safety,
        })
    }

    /// Evaluate every enabled circuit-breaker rule once.
    ///
    /// Returns the events this tick actually recorded (a trip another
    /// checker already recorded for the same window is not repeated).
    pub async fn circuit_tick(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CircuitBreakerEvent>, GovernorError> {
        let rules = self.governance.load_rules().await?;
        let mut tripped = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled) {
            let window = match parse_window(&rule.window) {
                Ok(window) => window,
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "rule window invalid; skipped");
                    continue;
                }
            };
            // Unrecognized conditions never trigger.
            let condition = match Condition::parse(&rule.condition) {
                Ok(condition) => condition,
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "rule condition unrecognized; never triggers");
                    continue;
                }
            };

            let window_chrono =
                Duration::from_std(window).unwrap_or_else(|_| Duration::minutes(5));
            let metrics = self.collect_metrics(now - window_chrono, now).await?;
            if !condition.evaluate(&metrics) {
                continue;
            }

            let details = format!(
                "condition '{}' tripped over window {}",
                rule.condition, rule.window
            );
            let event = CircuitBreakerEvent {
                id: Uuid::new_v4(),
                timestamp: now,
                rule: rule.name.clone(),
                metrics_snapshot: metrics,
                action: rule.action,
                details: details.clone(),
                resolved: false,
            };
            let bucket = window_bucket(now, window);

            if self.governance.apply_trip(rule, bucket, &event).await? {
                self.alerts
                    .alert(rule.alert_severity, &rule.name, &details)
                    .await;
                tripped.push(event);
            }
        }

        Ok(tripped)
    }

    /// Run one governor cycle: collect, score, and possibly propose.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, GovernorError> {
        let start = now - Duration::days(CYCLE_WINDOW_DAYS);
        let metrics = self.collect_metrics(start, now).await?;
        self.governance.insert_metrics_snapshot(&metrics).await?;

        let state = self.governance.load_state().await?;
        let days_in_phase = now
            .signed_duration_since(state.phase_start_date)
            .num_days();
        let readiness = assess(&metrics, state.current_phase, days_in_phase, now);
        self.governance.insert_readiness(&readiness).await?;

        let unresolved = self.governance.unresolved_events().await?;
        let pending = self.governance.pending_expansion_proposals().await?;

        let expansion_proposal = if readiness.overall.ready
            && unresolved.is_empty()
            && pending.is_empty()
        {
            self.build_expansion_proposal(&state, &metrics, &readiness, now)
                .await?
        } else {
            info!(
                ready = readiness.overall.ready,
                unresolved = unresolved.len(),
                pending = pending.len(),
                "expansion gate closed this cycle"
            );
            None
        };

        // Only touch the date fields on a freshly loaded record so a
        // demotion that landed mid-cycle is never clobbered.
        let mut fresh = self.governance.load_state().await?;
        fresh.last_report_date = Some(now);
        self.governance.save_state(&fresh).await?;

        Ok(CycleReport {
            metrics,
            readiness,
            unresolved_events: unresolved.len(),
            pending_proposals: pending.len(),
            expansion_proposal,
        })
    }

    /// Apply an approved expansion proposal to the governance state.
    pub async fn apply_expansion(
        &self,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GovernanceState, GovernorError> {
        let pending = self.governance.pending_expansion_proposals().await?;
        let proposal = pending
            .into_iter()
            .find(|p| p.proposal_id == proposal_id)
            .ok_or(GovernorError::ProposalNotFound { proposal_id })?;

        self.governance
            .set_expansion_status(proposal_id, "approved")
            .await?;

        let mut state = self.governance.load_state().await?;
        state.current_phase = proposal.expansion.target_phase;
        state.phase_start_date = now;
        for command in &proposal.expansion.commands_to_whitelist {
            if !state.command_whitelist.contains(command) {
                state.command_whitelist.push(*command);
            }
        }
        state.last_expansion_date = Some(now);
        self.governance.save_state(&state).await?;

        info!(
            phase = %state.current_phase,
            whitelist = state.command_whitelist.len(),
            "scope expansion applied"
        );
        Ok(state)
    }

    async fn build_expansion_proposal(
        &self,
        state: &GovernanceState,
        metrics: &AutonomyMetrics,
        readiness: &ReadinessReport,
        now: DateTime<Utc>,
    ) -> Result<Option<ScopeExpansionProposal>, GovernorError> {
        let Some(step) = next_expansion(state.current_phase) else {
            info!(phase = %state.current_phase, "already at the top of the ladder");
            return Ok(None);
        };

        let risk_level = assess_risk(step.target_phase, metrics, readiness);
        let mut mitigations = vec![
            "circuit breaker demotes to L3 on error-rate or rollback anomalies".to_owned(),
            "all newly whitelisted command types stay under constraint envelopes".to_owned(),
        ];
        if risk_level >= RiskLevel::Medium {
            mitigations
                .push("daily operator review of autonomous commands for the first week".to_owned());
        }

        let key_achievements = vec![
            format!(
                "{} commands executed with {:.2}% success over the window",
                metrics.commands.total,
                metrics.rates.success_rate * 100.0
            ),
            format!(
                "{} critical incidents, {} emergency aborts",
                metrics.incidents.critical, metrics.safety.emergency_aborts
            ),
            format!(
                "readiness score {:.2} with no blockers",
                readiness.overall.score
            ),
        ];

        let proposal = ScopeExpansionProposal {
            proposal_id: Uuid::new_v4(),
            timestamp: now,
            proposed_by: self.proposer.clone(),
            expansion: ExpansionPlan {
                current_phase: state.current_phase,
                target_phase: step.target_phase,
                commands_to_whitelist: step.commands_to_whitelist.clone(),
                validation_period_days: step.validation_period_days,
            },
            rationale: ExpansionRationale {
                metrics: metrics.clone(),
                readiness: readiness.clone(),
                key_achievements,
            },
            risk_assessment: RiskAssessment {
                level: risk_level,
                mitigations,
                rollback_plan:
                    "revert to L3 and clear the command whitelist; circuit breaker enforces this \
                     automatically on anomaly"
                        .to_owned(),
            },
            required_approvals: step.required_approvals,
        };

        self.governance.insert_expansion_proposal(&proposal).await?;
        info!(
            proposal_id = %proposal.proposal_id,
            target = %proposal.expansion.target_phase,
            risk = ?proposal.risk_assessment.level,
            "scope expansion proposed"
        );
        Ok(Some(proposal))
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roastd_core::circuit::{CircuitAction, CircuitBreakerRule};
    use roastd_core::command::{
        CommandProposal, CommandType, ProposalStatus, ProposedBy, RoasterCommand,
    };
    use roastd_core::governance::AutonomyPhase;
    use roastd_store::{Db, Dialect};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryAlertSink {
        alerts: Mutex<Vec<(AlertSeverity, String)>>,
    }

    #[async_trait::async_trait]
    impl AlertSink for MemoryAlertSink {
        async fn alert(&self, severity: AlertSeverity, rule: &str, _details: &str) {
            self.alerts.lock().await.push((severity, rule.to_owned()));
        }
    }

    struct Fixture {
        governor: Governor,
        proposals: ProposalStore,
        governance: GovernanceStore,
        alerts: Arc<MemoryAlertSink>,
    }

    async fn fixture() -> Fixture {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let proposals = ProposalStore::new(db.clone());
        let governance = GovernanceStore::new(db);
        let alerts = Arc::new(MemoryAlertSink::default());
        let governor = Governor::new(
            proposals.clone(),
            governance.clone(),
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
        );
        Fixture {
            governor,
            proposals,
            governance,
            alerts,
        }
    }

    async fn seed_proposal(store: &ProposalStore, status: ProposalStatus, command_type: CommandType) {
        let proposal = CommandProposal {
            proposal_id: Uuid::new_v4(),
            command: RoasterCommand {
                command_id: Uuid::new_v4(),
                command_type,
                machine_id: "machine-1".to_owned(),
                target_value: None,
                constraints: Vec::new(),
                params: serde_json::Value::Null,
            },
            proposed_by: ProposedBy::Agent,
            reasoning: "seed".to_owned(),
            status,
            approval_required: false,
            approval_timeout_seconds: 300,
            proposed_at: Utc::now(),
            approved_by: None,
            rejected_by: None,
            rejection_reason: None,
            execution_started_at: None,
            execution_completed_at: None,
            execution_duration_ms: None,
            outcome: None,
            audit_log: Vec::new(),
        };
        store.insert(&proposal).await.unwrap();
    }

    async fn seed_healthy_window(store: &ProposalStore, completed: usize) {
        for _ in 0..completed {
            seed_proposal(store, ProposalStatus::Completed, CommandType::SetPower).await;
        }
    }

    #[tokio::test]
    async fn metrics_combine_commands_and_incidents() {
        let f = fixture().await;
        seed_proposal(&f.proposals, ProposalStatus::Completed, CommandType::SetPower).await;
        seed_proposal(&f.proposals, ProposalStatus::Failed, CommandType::SetPower).await;

        let metrics = f
            .governor
            .collect_metrics(Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(metrics.commands.total, 2);
        assert_eq!(metrics.commands.failed, 1);
        assert!((metrics.rates.error_rate - 0.5).abs() < 1e-9);
        assert_eq!(metrics.incidents.total, 0);
    }

    #[tokio::test]
    async fn error_rate_trip_demotes_and_alerts_exactly_once() {
        let f = fixture().await;

        // Start at L4 with a whitelist.
        let mut state = f.governance.load_state().await.unwrap();
        state.current_phase = AutonomyPhase::L4;
        state.command_whitelist = vec![CommandType::SetPower, CommandType::SetFan];
        f.governance.save_state(&state).await.unwrap();

        f.governance
            .upsert_rule(&CircuitBreakerRule {
                name: "error-rate-demotion".to_owned(),
                enabled: true,
                condition: "errorRate > 0.05".to_owned(),
                window: "5m".to_owned(),
                action: CircuitAction::RevertToL3,
                alert_severity: AlertSeverity::Critical,
                command_type: None,
            })
            .await
            .unwrap();

        // 1 failed out of 10 → errorRate 0.10.
        seed_healthy_window(&f.proposals, 9).await;
        seed_proposal(&f.proposals, ProposalStatus::Failed, CommandType::SetPower).await;

        let now = Utc::now();
        let events = f.governor.circuit_tick(now).await.unwrap();
        assert_eq!(events.len(), 1);

        let state = f.governance.load_state().await.unwrap();
        assert_eq!(state.current_phase, AutonomyPhase::L3);
        assert!(state.command_whitelist.is_empty());
        assert_eq!(f.alerts.alerts.lock().await.len(), 1);

        // Same window bucket: no second event, no second alert.
        let again = f.governor.circuit_tick(now).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(f.governance.list_events(10).await.unwrap().len(), 1);
        assert_eq!(f.alerts.alerts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_condition_never_triggers() {
        let f = fixture().await;
        f.governance
            .upsert_rule(&CircuitBreakerRule {
                name: "mystery".to_owned(),
                enabled: true,
                condition: "vibes == bad".to_owned(),
                window: "5m".to_owned(),
                action: CircuitAction::RevertToL3,
                alert_severity: AlertSeverity::Warning,
                command_type: None,
            })
            .await
            .unwrap();
        seed_proposal(&f.proposals, ProposalStatus::Failed, CommandType::SetPower).await;

        let events = f.governor.circuit_tick(Utc::now()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn disabled_rule_is_skipped() {
        let f = fixture().await;
        f.governance
            .upsert_rule(&CircuitBreakerRule {
                name: "disabled".to_owned(),
                enabled: false,
                condition: "errorRate > 0.0".to_owned(),
                window: "5m".to_owned(),
                action: CircuitAction::AlertOnly,
                alert_severity: AlertSeverity::Info,
                command_type: None,
            })
            .await
            .unwrap();
        seed_proposal(&f.proposals, ProposalStatus::Failed, CommandType::SetPower).await;

        assert!(f.governor.circuit_tick(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn healthy_cycle_proposes_the_next_rung() {
        let f = fixture().await;

        let mut state = f.governance.load_state().await.unwrap();
        state.phase_start_date = Utc::now() - Duration::days(30);
        f.governance.save_state(&state).await.unwrap();

        seed_healthy_window(&f.proposals, 60).await;

        let report = f.governor.run_cycle(Utc::now()).await.unwrap();
        assert!(report.readiness.overall.ready);

        let proposal = report.expansion_proposal.expect("expansion proposed");
        assert_eq!(proposal.expansion.current_phase, AutonomyPhase::L3);
        assert_eq!(proposal.expansion.target_phase, AutonomyPhase::L3Plus);
        assert_eq!(
            proposal.expansion.commands_to_whitelist,
            vec![CommandType::SetPower, CommandType::SetFan]
        );
        assert_eq!(proposal.expansion.validation_period_days, 14);
        assert_eq!(proposal.required_approvals, vec!["tech-lead"]);
        assert_eq!(proposal.risk_assessment.level, RiskLevel::Low);

        // The snapshot and report landed.
        assert!(f.governance.latest_metrics().await.unwrap().is_some());
        assert!(f.governance.latest_readiness().await.unwrap().is_some());
        assert_eq!(
            f.governance.pending_expansion_proposals().await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn unresolved_event_blocks_expansion() {
        let f = fixture().await;
        let mut state = f.governance.load_state().await.unwrap();
        state.phase_start_date = Utc::now() - Duration::days(30);
        f.governance.save_state(&state).await.unwrap();
        seed_healthy_window(&f.proposals, 60).await;

        // A standing unresolved trip.
        let rule = CircuitBreakerRule {
            name: "standing".to_owned(),
            enabled: true,
            condition: "errorRate > 0.05".to_owned(),
            window: "5m".to_owned(),
            action: CircuitAction::AlertOnly,
            alert_severity: AlertSeverity::Warning,
            command_type: None,
        };
        let event = CircuitBreakerEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now() - Duration::days(20),
            rule: rule.name.clone(),
            metrics_snapshot: AutonomyMetrics::empty(Utc::now(), Utc::now()),
            action: rule.action,
            details: "old trip".to_owned(),
            resolved: false,
        };
        f.governance.apply_trip(&rule, 1, &event).await.unwrap();

        let report = f.governor.run_cycle(Utc::now()).await.unwrap();
        assert!(report.expansion_proposal.is_none());
        assert_eq!(report.unresolved_events, 1);
    }

    #[tokio::test]
    async fn pending_proposal_blocks_another() {
        let f = fixture().await;
        let mut state = f.governance.load_state().await.unwrap();
        state.phase_start_date = Utc::now() - Duration::days(30);
        f.governance.save_state(&state).await.unwrap();
        seed_healthy_window(&f.proposals, 60).await;

        let first = f.governor.run_cycle(Utc::now()).await.unwrap();
        assert!(first.expansion_proposal.is_some());

        let second = f.governor.run_cycle(Utc::now()).await.unwrap();
        assert!(second.expansion_proposal.is_none());
        assert_eq!(second.pending_proposals, 1);
    }

    #[tokio::test]
    async fn applying_an_expansion_moves_the_phase() {
        let f = fixture().await;
        let mut state = f.governance.load_state().await.unwrap();
        state.phase_start_date = Utc::now() - Duration::days(30);
        f.governance.save_state(&state).await.unwrap();
        seed_healthy_window(&f.proposals, 60).await;

        let report = f.governor.run_cycle(Utc::now()).await.unwrap();
        let proposal = report.expansion_proposal.unwrap();

        let state = f
            .governor
            .apply_expansion(proposal.proposal_id, Utc::now())
            .await
            .unwrap();
        assert_eq!(state.current_phase, AutonomyPhase::L3Plus);
        assert_eq!(
            state.command_whitelist,
            vec![CommandType::SetPower, CommandType::SetFan]
        );
        assert!(state.last_expansion_date.is_some());
        assert!(f
            .governance
            .pending_expansion_proposals()
            .await
            .unwrap()
            .is_empty());
    }
}
