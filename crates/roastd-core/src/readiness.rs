//! Readiness scoring for autonomy expansion.
//!
//! Three weighted checklists (technical, process, organizational) are scored
//! against a metrics window. Category maxima are fixed — technical 35,
//! process 25, organizational 20, total 80 — and the overall score is the
//! passing weight divided by 80. Expansion requires `score ≥ 0.95` with no
//! required item failing.
//!
//! Recommendations and next actions are advisory strings produced from a
//! fixed per-item rule table; nothing downstream branches on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::governance::AutonomyPhase;
use crate::metrics::AutonomyMetrics;

/// Fixed category maxima.
pub const TECHNICAL_MAX: u32 = 35;
pub const PROCESS_MAX: u32 = 25;
pub const ORGANIZATIONAL_MAX: u32 = 20;
pub const TOTAL_MAX: u32 = TECHNICAL_MAX + PROCESS_MAX + ORGANIZATIONAL_MAX;

/// Overall score required for readiness.
pub const READY_THRESHOLD: f64 = 0.95;

/// One checklist item with its evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub name: String,
    pub weight: u32,
    pub required: bool,
    /// Whether the item passed.
    pub status: bool,
    pub details: String,
}

/// A scored category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    /// Sum of weights of passing items.
    pub score: u32,
    pub max_score: u32,
    pub items: Vec<ChecklistItem>,
}

impl CategoryReport {
    /// An empty category with the given maximum, for tests and defaults.
    #[must_use]
    pub fn empty(max_score: u32) -> Self {
        Self {
            score: 0,
            max_score,
            items: Vec::new(),
        }
    }
}

/// The overall verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallReadiness {
    /// Passing weight ÷ 80, in `[0, 1]`.
    pub score: f64,
    pub ready: bool,
    /// Names of failing required items.
    pub blockers: Vec<String>,
}

/// A full readiness assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub timestamp: DateTime<Utc>,
    pub current_phase: AutonomyPhase,
    pub days_since_phase_start: i64,
    pub overall: OverallReadiness,
    pub technical: CategoryReport,
    pub process: CategoryReport,
    pub organizational: CategoryReport,
    pub recommendations: Vec<String>,
    pub next_actions: Vec<String>,
}

/// One row of the fixed rule table: identity, weight, and the advisory
/// strings emitted when the item fails.
struct ItemRule {
    name: &'static str,
    weight: u32,
    required: bool,
    recommendation: &'static str,
    next_action: &'static str,
}

/// An `ItemRule` paired with its evaluation for this window.
struct Evaluated {
    rule: ItemRule,
    passed: bool,
    details: String,
}

fn check(rule: ItemRule, passed: bool, details: String) -> Evaluated {
    Evaluated {
        rule,
        passed,
        details,
    }
}

/// Score readiness for expansion from a metrics window.
#[must_use]
pub fn assess(
    metrics: &AutonomyMetrics,
    current_phase: AutonomyPhase,
    days_since_phase_start: i64,
    now: DateTime<Utc>,
) -> ReadinessReport {
    let rates = &metrics.rates;
    let safety = &metrics.safety;
    let incidents = &metrics.incidents;

    let technical = vec![
        check(
            ItemRule {
                name: "command-success-rate",
                weight: 10,
                required: true,
                recommendation: "investigate recent command failures before expanding scope",
                next_action: "review failed command proposals from the window",
            },
            rates.success_rate >= 0.995,
            format!("success rate {:.4}", rates.success_rate),
        ),
        check(
            ItemRule {
                name: "command-error-rate",
                weight: 8,
                required: true,
                recommendation: "drive the command error rate under 1%",
                next_action: "triage the dominant error class in the proposal audit logs",
            },
            rates.error_rate <= 0.01,
            format!("error rate {:.4}", rates.error_rate),
        ),
        check(
            ItemRule {
                name: "rollback-rate",
                weight: 7,
                required: false,
                recommendation: "reduce rollbacks by tightening pre-dispatch constraints",
                next_action: "audit rolled-back commands for shared root causes",
            },
            rates.rollback_rate <= 0.005,
            format!("rollback rate {:.4}", rates.rollback_rate),
        ),
        check(
            ItemRule {
                name: "no-emergency-aborts",
                weight: 5,
                required: true,
                recommendation: "every emergency abort must have a closed postmortem",
                next_action: "close out postmortems for window aborts",
            },
            safety.emergency_aborts == 0,
            format!("{} emergency aborts", safety.emergency_aborts),
        ),
        check(
            ItemRule {
                name: "no-constraint-violations",
                weight: 5,
                required: false,
                recommendation: "tune constraint envelopes so agents stop proposing outside them",
                next_action: "review constraint-rejected proposals",
            },
            safety.constraint_violations == 0,
            format!("{} constraint violations", safety.constraint_violations),
        ),
    ];

    let process = vec![
        check(
            ItemRule {
                name: "approval-rate",
                weight: 10,
                required: true,
                recommendation: "low approval rates mean agent proposals are not trusted yet",
                next_action: "review rejected proposals with the operations team",
            },
            rates.approval_rate >= 0.95,
            format!("approval rate {:.4}", rates.approval_rate),
        ),
        check(
            ItemRule {
                name: "validation-period-elapsed",
                weight: 8,
                required: true,
                recommendation: "let the current phase soak for its full validation period",
                next_action: "wait out the remaining validation days",
            },
            days_since_phase_start >= 14,
            format!("{days_since_phase_start} days in phase"),
        ),
        check(
            ItemRule {
                name: "no-critical-incidents",
                weight: 7,
                required: true,
                recommendation: "critical incidents block expansion until resolved",
                next_action: "resolve open critical incidents",
            },
            incidents.critical == 0,
            format!("{} critical incidents", incidents.critical),
        ),
    ];

    let organizational = vec![
        check(
            ItemRule {
                name: "no-open-incidents",
                weight: 8,
                required: true,
                recommendation: "close all window incidents before expanding",
                next_action: "drive open incidents to resolution",
            },
            incidents.total == 0,
            format!("{} incidents", incidents.total),
        ),
        check(
            ItemRule {
                name: "no-autonomous-incidents",
                weight: 7,
                required: false,
                recommendation: "incidents caused by autonomous actions erode operator trust",
                next_action: "present autonomous-incident analysis to stakeholders",
            },
            incidents.from_autonomous_actions == 0,
            format!(
                "{} incidents from autonomous actions",
                incidents.from_autonomous_actions
            ),
        ),
        check(
            ItemRule {
                name: "sufficient-operating-volume",
                weight: 5,
                required: false,
                recommendation: "the window needs enough commands to be statistically meaningful",
                next_action: "accumulate at least 50 commands in the window",
            },
            metrics.commands.total >= 50,
            format!("{} commands in window", metrics.commands.total),
        ),
    ];

    let mut recommendations = Vec::new();
    let mut next_actions = Vec::new();
    let mut blockers = Vec::new();
    for evaluated in technical.iter().chain(&process).chain(&organizational) {
        if evaluated.passed {
            continue;
        }
        recommendations.push(evaluated.rule.recommendation.to_owned());
        next_actions.push(evaluated.rule.next_action.to_owned());
        if evaluated.rule.required {
            blockers.push(evaluated.rule.name.to_owned());
        }
    }

    let technical = into_category(TECHNICAL_MAX, technical);
    let process = into_category(PROCESS_MAX, process);
    let organizational = into_category(ORGANIZATIONAL_MAX, organizational);

    let passing = technical.score + process.score + organizational.score;
    let score = f64::from(passing) / f64::from(TOTAL_MAX);
    let ready = score >= READY_THRESHOLD && blockers.is_empty();

    ReadinessReport {
        timestamp: now,
        current_phase,
        days_since_phase_start,
        overall: OverallReadiness {
            score,
            ready,
            blockers,
        },
        technical,
        process,
        organizational,
        recommendations,
        next_actions,
    }
}

fn into_category(max_score: u32, evaluated: Vec<Evaluated>) -> CategoryReport {
    let items: Vec<ChecklistItem> = evaluated
        .into_iter()
        .map(|e| ChecklistItem {
            name: e.rule.name.to_owned(),
            weight: e.rule.weight,
            required: e.rule.required,
            status: e.passed,
            details: e.details,
        })
        .collect();
    let score = items.iter().filter(|i| i.status).map(|i| i.weight).sum();
    CategoryReport {
        score,
        max_score,
        items,
    }
}
