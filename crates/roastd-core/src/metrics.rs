//! Autonomy metrics.
//!
//! Aggregated over the command proposal table for a time window. Rates are
//! plain ratios in `[0, 1]`; a zero denominator always yields 0, never NaN.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The aggregation window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Command counts by proposal status and execution outcome.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCounts {
    pub total: u64,
    pub proposed: u64,
    pub approved: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rolled_back: u64,
}

/// Derived rates. All in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRates {
    pub success_rate: f64,
    pub approval_rate: f64,
    pub rollback_rate: f64,
    pub error_rate: f64,
}

impl CommandRates {
    /// Derive rates from counts, reporting 0 for undefined denominators.
    #[must_use]
    pub fn derive(counts: &CommandCounts) -> Self {
        Self {
            success_rate: ratio(counts.succeeded, counts.succeeded + counts.failed),
            approval_rate: ratio(counts.approved, counts.proposed),
            rollback_rate: ratio(counts.rolled_back, counts.succeeded),
            error_rate: ratio(counts.failed, counts.total),
        }
    }
}

/// Incident counts within the window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCounts {
    pub total: u64,
    pub critical: u64,
    pub from_autonomous_actions: u64,
}

/// Safety signal counts within the window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyCounts {
    pub constraint_violations: u64,
    pub emergency_aborts: u64,
    pub safety_gate_triggers: u64,
}

/// The full metrics record for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutonomyMetrics {
    pub period: MetricsPeriod,
    pub commands: CommandCounts,
    pub rates: CommandRates,
    pub incidents: IncidentCounts,
    pub safety: SafetyCounts,
}

impl AutonomyMetrics {
    /// An empty metrics record over the given window.
    #[must_use]
    pub fn empty(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            period: MetricsPeriod { start, end },
            commands: CommandCounts::default(),
            rates: CommandRates::default(),
            incidents: IncidentCounts::default(),
            safety: SafetyCounts::default(),
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
