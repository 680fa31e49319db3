//! Autonomy governance: the phase ladder and scope expansion.
//!
//! The fleet operates at one autonomy phase at a time, tracked in a single
//! process-wide governance record. The circuit breaker may demote the phase
//! to L3 at any time; expansions only happen through reviewed scope
//! expansion proposals generated by the governor's weekly cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandType;
use crate::metrics::AutonomyMetrics;
use crate::readiness::ReadinessReport;

/// The autonomy phase ladder, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AutonomyPhase {
    L3,
    #[serde(rename = "L3+")]
    L3Plus,
    L4,
    #[serde(rename = "L4+")]
    L4Plus,
    L5,
}

impl std::fmt::Display for AutonomyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::L3 => "L3",
            Self::L3Plus => "L3+",
            Self::L4 => "L4",
            Self::L4Plus => "L4+",
            Self::L5 => "L5",
        };
        f.write_str(s)
    }
}

/// The process-wide governance record. Exactly one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceState {
    pub current_phase: AutonomyPhase,
    pub phase_start_date: DateTime<Utc>,
    /// Command types an AGENT actor may propose without forced approval.
    #[serde(default)]
    pub command_whitelist: Vec<CommandType>,
    /// Command types paused by a circuit-breaker action; proposals for these
    /// always require approval regardless of the whitelist.
    #[serde(default)]
    pub paused_command_types: Vec<CommandType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_expansion_date: Option<DateTime<Utc>>,
}

impl GovernanceState {
    /// The bootstrap state: L3, empty whitelist.
    #[must_use]
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            current_phase: AutonomyPhase::L3,
            phase_start_date: now,
            command_whitelist: Vec::new(),
            paused_command_types: Vec::new(),
            last_report_date: None,
            last_expansion_date: None,
        }
    }

    /// Demote to L3: clear the whitelist and restart the phase clock.
    /// This is the circuit breaker's authoritative action.
    pub fn demote(&mut self, now: DateTime<Utc>) {
        self.current_phase = AutonomyPhase::L3;
        self.phase_start_date = now;
        self.command_whitelist.clear();
    }

    /// Whether an AGENT proposal for `command_type` may skip forced approval.
    #[must_use]
    pub fn agent_may_propose_unattended(&self, command_type: CommandType) -> bool {
        self.command_whitelist.contains(&command_type)
            && !self.paused_command_types.contains(&command_type)
    }
}

/// One rung of the expansion ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseExpansion {
    pub target_phase: AutonomyPhase,
    pub commands_to_whitelist: Vec<CommandType>,
    pub validation_period_days: u32,
    pub required_approvals: Vec<String>,
}

/// The fixed expansion table: what the next phase unlocks, how long it must
/// be validated, and who must sign off.
#[must_use]
pub fn next_expansion(current: AutonomyPhase) -> Option<PhaseExpansion> {
    let approvals = |names: &[&str]| names.iter().map(|s| (*s).to_owned()).collect();
    match current {
        AutonomyPhase::L3 => Some(PhaseExpansion {
            target_phase: AutonomyPhase::L3Plus,
            commands_to_whitelist: vec![CommandType::SetPower, CommandType::SetFan],
            validation_period_days: 14,
            required_approvals: approvals(&["tech-lead"]),
        }),
        AutonomyPhase::L3Plus => Some(PhaseExpansion {
            target_phase: AutonomyPhase::L4,
            commands_to_whitelist: vec![CommandType::SetDrum, CommandType::SetAirflow],
            validation_period_days: 21,
            required_approvals: approvals(&["tech-lead", "ops-lead"]),
        }),
        AutonomyPhase::L4 => Some(PhaseExpansion {
            target_phase: AutonomyPhase::L4Plus,
            commands_to_whitelist: vec![CommandType::Preheat, CommandType::CoolingCycle],
            validation_period_days: 30,
            required_approvals: approvals(&["tech-lead", "ops-lead", "product-lead"]),
        }),
        AutonomyPhase::L4Plus => Some(PhaseExpansion {
            target_phase: AutonomyPhase::L5,
            commands_to_whitelist: vec![CommandType::EmergencyShutdown, CommandType::Abort],
            validation_period_days: 60,
            required_approvals: approvals(&[
                "tech-lead",
                "ops-lead",
                "product-lead",
                "exec-sponsor",
            ]),
        }),
        AutonomyPhase::L5 => None,
    }
}

/// Risk classification of an expansion proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Risk assessment attached to an expansion proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub mitigations: Vec<String>,
    pub rollback_plan: String,
}

/// The expansion being proposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionPlan {
    pub current_phase: AutonomyPhase,
    pub target_phase: AutonomyPhase,
    pub commands_to_whitelist: Vec<CommandType>,
    pub validation_period_days: u32,
}

/// Evidence backing an expansion proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionRationale {
    pub metrics: AutonomyMetrics,
    pub readiness: ReadinessReport,
    pub key_achievements: Vec<String>,
}

/// A generated scope expansion proposal awaiting human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeExpansionProposal {
    pub proposal_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub proposed_by: String,
    pub expansion: ExpansionPlan,
    pub rationale: ExpansionRationale,
    pub risk_assessment: RiskAssessment,
    pub required_approvals: Vec<String>,
}

/// Classify expansion risk from the evidence.
///
/// `low` unless the window shows weakness (`successRate < 0.997`,
/// `errorRate > 0.02`, or overall readiness `< 0.97`), in which case
/// `medium`; targets L4+ and L5 are never below `medium`.
#[must_use]
pub fn assess_risk(
    target: AutonomyPhase,
    metrics: &AutonomyMetrics,
    readiness: &ReadinessReport,
) -> RiskLevel {
    let mut level = RiskLevel::Low;
    if metrics.rates.success_rate < 0.997
        || metrics.rates.error_rate > 0.02
        || readiness.overall.score < 0.97
    {
        level = RiskLevel::Medium;
    }
    if matches!(target, AutonomyPhase::L4Plus | AutonomyPhase::L5) {
        level = level.max(RiskLevel::Medium);
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::{CategoryReport, OverallReadiness};

    fn readiness_with_score(score: f64) -> ReadinessReport {
        ReadinessReport {
            timestamp: Utc::now(),
            current_phase: AutonomyPhase::L3,
            days_since_phase_start: 30,
            overall: OverallReadiness {
                score,
                ready: score >= 0.95,
                blockers: Vec::new(),
            },
            technical: CategoryReport::empty(35),
            process: CategoryReport::empty(25),
            organizational: CategoryReport::empty(20),
            recommendations: Vec::new(),
            next_actions: Vec::new(),
        }
    }

    fn healthy_metrics() -> AutonomyMetrics {
        let mut m = AutonomyMetrics::empty(Utc::now(), Utc::now());
        m.rates.success_rate = 0.999;
        m.rates.error_rate = 0.001;
        m
    }

    #[test]
    fn phase_serializes_with_plus_suffix() {
        assert_eq!(
            serde_json::to_string(&AutonomyPhase::L3Plus).unwrap(),
            "\"L3+\""
        );
        assert_eq!(serde_json::to_string(&AutonomyPhase::L5).unwrap(), "\"L5\"");
    }

    #[test]
    fn expansion_table_matches_the_ladder() {
        let step = next_expansion(AutonomyPhase::L3).unwrap();
        assert_eq!(step.target_phase, AutonomyPhase::L3Plus);
        assert_eq!(
            step.commands_to_whitelist,
            vec![CommandType::SetPower, CommandType::SetFan]
        );
        assert_eq!(step.validation_period_days, 14);
        assert_eq!(step.required_approvals, vec!["tech-lead"]);

        let last = next_expansion(AutonomyPhase::L4Plus).unwrap();
        assert_eq!(last.target_phase, AutonomyPhase::L5);
        assert_eq!(last.validation_period_days, 60);
        assert_eq!(last.required_approvals.len(), 4);

        assert!(next_expansion(AutonomyPhase::L5).is_none());
    }

    #[test]
    fn demote_clears_whitelist_and_restarts_clock() {
        let mut state = GovernanceState::initial(Utc::now() - chrono::Duration::days(30));
        state.current_phase = AutonomyPhase::L4;
        state.command_whitelist = vec![CommandType::SetPower];

        let now = Utc::now();
        state.demote(now);
        assert_eq!(state.current_phase, AutonomyPhase::L3);
        assert!(state.command_whitelist.is_empty());
        assert_eq!(state.phase_start_date, now);
    }

    #[test]
    fn paused_type_blocks_unattended_proposals() {
        let mut state = GovernanceState::initial(Utc::now());
        state.command_whitelist = vec![CommandType::SetPower];
        assert!(state.agent_may_propose_unattended(CommandType::SetPower));

        state.paused_command_types = vec![CommandType::SetPower];
        assert!(!state.agent_may_propose_unattended(CommandType::SetPower));
    }

    #[test]
    fn risk_is_low_for_healthy_low_target() {
        let level = assess_risk(
            AutonomyPhase::L3Plus,
            &healthy_metrics(),
            &readiness_with_score(0.99),
        );
        assert_eq!(level, RiskLevel::Low);
    }

    #[test]
    fn weak_metrics_raise_risk_to_medium() {
        let mut metrics = healthy_metrics();
        metrics.rates.success_rate = 0.99;
        let level = assess_risk(
            AutonomyPhase::L3Plus,
            &metrics,
            &readiness_with_score(0.99),
        );
        assert_eq!(level, RiskLevel::Medium);
    }

    #[test]
    fn high_phases_are_at_least_medium() {
        let level = assess_risk(
            AutonomyPhase::L5,
            &healthy_metrics(),
            &readiness_with_score(1.0),
        );
        assert_eq!(level, RiskLevel::Medium);
    }
}
