//! Roaster command proposals.
//!
//! A command proposal is the only path by which the fabric (or a human
//! operator) actuates hardware. Proposals move through an approval state
//! machine and every transition is appended to an embedded audit log:
//!
//! ```text
//! PROPOSED ──► PENDING_APPROVAL ──► APPROVED ──► EXECUTING ──► COMPLETED
//!     │                │                                   │──► FAILED
//!     └───(no approval required)──► APPROVED               └──► ABORTED
//!                      └──► REJECTED (explicit or timeout)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Failure code recorded when a driver declines `write_command`.
pub const UNSUPPORTED_OPERATION: &str = "UNSUPPORTED_OPERATION";

/// The roaster command vocabulary, ordered roughly by autonomy phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    SetPower,
    SetFan,
    SetDrum,
    SetAirflow,
    Preheat,
    CoolingCycle,
    EmergencyShutdown,
    Abort,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SetPower => "SET_POWER",
            Self::SetFan => "SET_FAN",
            Self::SetDrum => "SET_DRUM",
            Self::SetAirflow => "SET_AIRFLOW",
            Self::Preheat => "PREHEAT",
            Self::CoolingCycle => "COOLING_CYCLE",
            Self::EmergencyShutdown => "EMERGENCY_SHUTDOWN",
            Self::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// A concrete command addressed to one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoasterCommand {
    pub command_id: Uuid,
    pub command_type: CommandType,
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Opaque driver parameters.
    #[serde(default)]
    pub params: Value,
}

/// Who proposed the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposedBy {
    Agent,
    Human,
}

impl std::fmt::Display for ProposedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Agent => "AGENT",
            Self::Human => "HUMAN",
        })
    }
}

/// Proposal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Proposed,
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Aborted,
}

impl ProposalStatus {
    /// Whether the proposal is finalized.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Failed | Self::Aborted
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "PROPOSED",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Result status reported by a driver for a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Accepted,
    Completed,
    Aborted,
    Failed,
    Rejected,
}

impl DriverStatus {
    /// Map the driver result onto the proposal's terminal status.
    #[must_use]
    pub fn into_proposal_status(self) -> ProposalStatus {
        match self {
            Self::Accepted | Self::Completed => ProposalStatus::Completed,
            Self::Aborted => ProposalStatus::Aborted,
            Self::Failed | Self::Rejected => ProposalStatus::Failed,
        }
    }
}

/// Execution outcome recorded on a finalized proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub status: DriverStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One append-only audit record. Transitions never rewrite earlier entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default)]
    pub details: Value,
}

/// A command proposal with its approval state and audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandProposal {
    pub proposal_id: Uuid,
    pub command: RoasterCommand,
    pub proposed_by: ProposedBy,
    pub reasoning: String,
    pub status: ProposalStatus,
    pub approval_required: bool,
    pub approval_timeout_seconds: u64,
    pub proposed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CommandOutcome>,
    #[serde(default)]
    pub audit_log: Vec<AuditLogEntry>,
}

impl CommandProposal {
    /// Append an audit entry. The log is strictly append-only; callers never
    /// mutate or remove earlier entries.
    pub fn record(&mut self, event: impl Into<String>, actor: Option<&str>, details: Value) {
        self.audit_log.push(AuditLogEntry {
            timestamp: Utc::now(),
            event: event.into(),
            actor: actor.map(str::to_owned),
            details,
        });
    }

    /// Whether the approval window has lapsed for a proposal still waiting.
    #[must_use]
    pub fn approval_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::PendingApproval
            && now
                .signed_duration_since(self.proposed_at)
                .num_seconds()
                .unsigned_abs()
                > self.approval_timeout_seconds
    }
}
