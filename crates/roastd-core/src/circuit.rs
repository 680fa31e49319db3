//! Circuit-breaker rules.
//!
//! A rule names a metric condition over a trailing time window and an action
//! to apply when the condition trips: demote the fleet to L3, pause a
//! command type, or alert only. Conditions use a deliberately small grammar —
//! a single comparison — parsed at rule load. Unrecognized conditions are
//! kept but never trigger; the loader warns once.
//!
//! Window grammar: `[0-9]+(s|m|h|d)`.
//! Condition grammar: `lhs op rhs` with
//! `lhs ∈ {errorRate, rollbackRate, successRate, incidents.critical,
//! commandType.failures, constraintViolations, emergencyAborts}`,
//! `op ∈ {>, >=, <, <=, ==}`, and numeric `rhs`. The legacy shape
//! `incident.severity === "critical"` is recognized and triggers when the
//! window holds any critical incident.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandType;
use crate::error::CircuitError;
use crate::metrics::AutonomyMetrics;

/// Action applied when a rule trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitAction {
    RevertToL3,
    PauseCommandType,
    AlertOnly,
}

/// Severity attached to the alert emitted on a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// A configured circuit-breaker rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerRule {
    pub name: String,
    pub enabled: bool,
    /// Condition expression; see the module docs for the grammar.
    pub condition: String,
    /// Trailing window, e.g. `5m`.
    pub window: String,
    pub action: CircuitAction,
    pub alert_severity: AlertSeverity,
    /// Which command type a `pause_command_type` action pauses. Ignored by
    /// the other actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_type: Option<CommandType>,
}

/// A durable record of one rule trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub rule: String,
    pub metrics_snapshot: AutonomyMetrics,
    pub action: CircuitAction,
    pub details: String,
    pub resolved: bool,
}

/// Parse a window like `5m` into a duration.
///
/// Laws: `parse_window("5m") = 300 s`, `parse_window("2h") = 7200 s`,
/// `parse_window("30s") = 30 s`.
pub fn parse_window(window: &str) -> Result<Duration, CircuitError> {
    let invalid = || CircuitError::InvalidWindow {
        window: window.to_owned(),
    };

    if window.len() < 2 {
        return Err(invalid());
    }
    let (digits, unit) = window.split_at(window.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = match unit {
        "s" => amount,
        "m" => amount.saturating_mul(60),
        "h" => amount.saturating_mul(3_600),
        "d" => amount.saturating_mul(86_400),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(secs))
}

/// The metric a condition compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionLhs {
    ErrorRate,
    RollbackRate,
    SuccessRate,
    IncidentsCritical,
    /// Per-command-type failure tracking does not exist; this evaluates
    /// against `commands.failed` (the platform contract).
    CommandTypeFailures,
    ConstraintViolations,
    EmergencyAborts,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

/// A parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        lhs: ConditionLhs,
        op: ConditionOp,
        rhs: f64,
    },
    /// `incident.severity === "critical"` — trips when the window holds any
    /// critical incident.
    CriticalIncident,
}

impl Condition {
    /// Parse a condition expression.
    pub fn parse(condition: &str) -> Result<Self, CircuitError> {
        let unrecognized = || CircuitError::UnrecognizedCondition {
            condition: condition.to_owned(),
        };

        let tokens: Vec<&str> = condition.split_whitespace().collect();
        let [lhs, op, rhs] = tokens.as_slice() else {
            return Err(unrecognized());
        };

        // Legacy severity shape.
        if *lhs == "incident.severity" && *op == "===" {
            return if rhs.trim_matches('"') == "critical" {
                Ok(Self::CriticalIncident)
            } else {
                Err(unrecognized())
            };
        }

        let lhs = match *lhs {
            "errorRate" => ConditionLhs::ErrorRate,
            "rollbackRate" => ConditionLhs::RollbackRate,
            "successRate" => ConditionLhs::SuccessRate,
            "incidents.critical" => ConditionLhs::IncidentsCritical,
            "commandType.failures" => ConditionLhs::CommandTypeFailures,
            "constraintViolations" => ConditionLhs::ConstraintViolations,
            "emergencyAborts" => ConditionLhs::EmergencyAborts,
            _ => return Err(unrecognized()),
        };
        let op = match *op {
            ">" => ConditionOp::Gt,
            ">=" => ConditionOp::Ge,
            "<" => ConditionOp::Lt,
            "<=" => ConditionOp::Le,
            "==" => ConditionOp::Eq,
            _ => return Err(unrecognized()),
        };
        let rhs: f64 = rhs.parse().map_err(|_| unrecognized())?;

        Ok(Self::Compare { lhs, op, rhs })
    }

    /// Evaluate the condition against a metrics window.
    #[must_use]
    pub fn evaluate(&self, metrics: &AutonomyMetrics) -> bool {
        match self {
            Self::CriticalIncident => metrics.incidents.critical > 0,
            Self::Compare { lhs, op, rhs } => {
                let value = match lhs {
                    ConditionLhs::ErrorRate => metrics.rates.error_rate,
                    ConditionLhs::RollbackRate => metrics.rates.rollback_rate,
                    ConditionLhs::SuccessRate => metrics.rates.success_rate,
                    ConditionLhs::IncidentsCritical => metrics.incidents.critical as f64,
                    ConditionLhs::CommandTypeFailures => metrics.commands.failed as f64,
                    ConditionLhs::ConstraintViolations => {
                        metrics.safety.constraint_violations as f64
                    }
                    ConditionLhs::EmergencyAborts => metrics.safety.emergency_aborts as f64,
                };
                match op {
                    ConditionOp::Gt => value > *rhs,
                    ConditionOp::Ge => value >= *rhs,
                    ConditionOp::Lt => value < *rhs,
                    ConditionOp::Le => value <= *rhs,
                    ConditionOp::Eq => (value - rhs).abs() < f64::EPSILON,
                }
            }
        }
    }
}

/// Deterministic dedup bucket for a (rule, window) pair.
///
/// Two checkers evaluating the same rule inside the same window bucket
/// compute the same value, so the event insert can dedup on
/// `(rule, bucket)` and exactly one event survives concurrent ticks.
#[must_use]
pub fn window_bucket(now: DateTime<Utc>, window: Duration) -> i64 {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
    now.timestamp_millis().div_euclid(window_ms)
}

/// The built-in rule set seeded when no rules are configured.
#[must_use]
pub fn default_rules() -> Vec<CircuitBreakerRule> {
    vec![
        CircuitBreakerRule {
            name: "error-rate-demotion".to_owned(),
            enabled: true,
            condition: "errorRate > 0.05".to_owned(),
            window: "5m".to_owned(),
            action: CircuitAction::RevertToL3,
            alert_severity: AlertSeverity::Critical,
            command_type: None,
        },
        CircuitBreakerRule {
            name: "rollback-rate-demotion".to_owned(),
            enabled: true,
            condition: "rollbackRate > 0.02".to_owned(),
            window: "15m".to_owned(),
            action: CircuitAction::RevertToL3,
            alert_severity: AlertSeverity::Critical,
            command_type: None,
        },
        CircuitBreakerRule {
            name: "critical-incident-demotion".to_owned(),
            enabled: true,
            condition: "incident.severity === \"critical\"".to_owned(),
            window: "1h".to_owned(),
            action: CircuitAction::RevertToL3,
            alert_severity: AlertSeverity::Critical,
            command_type: None,
        },
        CircuitBreakerRule {
            name: "emergency-abort-alert".to_owned(),
            enabled: true,
            condition: "emergencyAborts > 0".to_owned(),
            window: "1h".to_owned(),
            action: CircuitAction::AlertOnly,
            alert_severity: AlertSeverity::Warning,
            command_type: None,
        },
    ]
}
