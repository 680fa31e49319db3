//! The command proposal service.
//!
//! Every actuation of a roaster goes through a proposal. Admission consults
//! the governance record: an AGENT proposing a command type outside the
//! whitelist — or one paused by the circuit breaker — is forced through
//! human approval whatever the caller asked for. Every transition appends to
//! the proposal's audit log before it is persisted.
//!
//! ```text
//! PROPOSED → PENDING_APPROVAL → APPROVED → EXECUTING → COMPLETED/FAILED/ABORTED
//!          ↘ APPROVED (no approval required)     PENDING_APPROVAL → REJECTED
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use roastd_core::command::{
    CommandOutcome, CommandProposal, CommandType, DriverStatus, ProposalStatus, ProposedBy,
    RoasterCommand, UNSUPPORTED_OPERATION,
};
use roastd_store::{GovernanceStore, ProposalStore, StoreError};

use crate::driver::{DriverError, DriverRegistry};

/// Default approval window.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;

/// Errors from the proposal service.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("proposal not found: {proposal_id}")]
    NotFound { proposal_id: Uuid },

    #[error("proposal {proposal_id} is {actual}, expected {expected}")]
    InvalidState {
        proposal_id: Uuid,
        actual: ProposalStatus,
        expected: ProposalStatus,
    },

    #[error("no driver registered for machine '{machine_id}'")]
    NoDriver { machine_id: String },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A request to propose a command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeRequest {
    pub command_type: CommandType,
    pub machine_id: String,
    #[serde(default)]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub params: Value,
    pub proposed_by: ProposedBy,
    pub reasoning: String,
    /// Caller's wish; admission may force `true`.
    #[serde(default)]
    pub approval_required: Option<bool>,
    #[serde(default)]
    pub approval_timeout_seconds: Option<u64>,
}

/// The command proposal service.
pub struct CommandService {
    proposals: ProposalStore,
    governance: GovernanceStore,
    drivers: Arc<DriverRegistry>,
}

impl CommandService {
    #[must_use]
    pub fn new(
        proposals: ProposalStore,
        governance: GovernanceStore,
        drivers: Arc<DriverRegistry>,
    ) -> Self {
        Self {
            proposals,
            governance,
            drivers,
        }
    }

    /// Create a proposal, applying whitelist admission for AGENT actors.
    pub async fn propose(&self, request: ProposeRequest) -> Result<CommandProposal, CommandError> {
        let state = self.governance.load_state().await?;

        let approval_required = match request.proposed_by {
            // Humans carry their own authority unless they ask for review.
            ProposedBy::Human => request.approval_required.unwrap_or(false),
            // Agents may run unattended only inside the active whitelist,
            // and never for a paused command type.
            ProposedBy::Agent => {
                let unattended = state.agent_may_propose_unattended(request.command_type);
                request.approval_required.unwrap_or(false) || !unattended
            }
        };

        let now = Utc::now();
        let mut proposal = CommandProposal {
            proposal_id: Uuid::new_v4(),
            command: RoasterCommand {
                command_id: Uuid::new_v4(),
                command_type: request.command_type,
                machine_id: request.machine_id,
                target_value: request.target_value,
                constraints: request.constraints,
                params: request.params,
            },
            proposed_by: request.proposed_by,
            reasoning: request.reasoning,
            status: ProposalStatus::Proposed,
            approval_required,
            approval_timeout_seconds: request
                .approval_timeout_seconds
                .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_SECS),
            proposed_at: now,
            approved_by: None,
            rejected_by: None,
            rejection_reason: None,
            execution_started_at: None,
            execution_completed_at: None,
            execution_duration_ms: None,
            outcome: None,
            audit_log: Vec::new(),
        };
        proposal.record(
            "proposed",
            Some(&proposal.proposed_by.to_string()),
            serde_json::json!({
                "commandType": proposal.command.command_type,
                "machineId": proposal.command.machine_id,
                "approvalRequired": approval_required,
            }),
        );

        if approval_required {
            proposal.status = ProposalStatus::PendingApproval;
            proposal.record("pending-approval", None, Value::Null);
        } else {
            proposal.status = ProposalStatus::Approved;
            proposal.record("auto-approved", None, Value::Null);
        }

        self.proposals.insert(&proposal).await?;
        info!(
            proposal_id = %proposal.proposal_id,
            command_type = %proposal.command.command_type,
            status = %proposal.status,
            "command proposed"
        );
        Ok(proposal)
    }

    /// Approve a pending proposal. Idempotent when already approved.
    pub async fn approve(
        &self,
        proposal_id: Uuid,
        actor: &str,
    ) -> Result<CommandProposal, CommandError> {
        let mut proposal = self.load(proposal_id).await?;

        if proposal.status == ProposalStatus::Approved {
            return Ok(proposal);
        }
        if proposal.status != ProposalStatus::PendingApproval {
            return Err(CommandError::InvalidState {
                proposal_id,
                actual: proposal.status,
                expected: ProposalStatus::PendingApproval,
            });
        }

        proposal.status = ProposalStatus::Approved;
        proposal.approved_by = Some(actor.to_owned());
        proposal.record("approved", Some(actor), Value::Null);
        self.proposals.save(&proposal).await?;
        info!(proposal_id = %proposal_id, actor = %actor, "proposal approved");
        Ok(proposal)
    }

    /// Reject a pending proposal. Idempotent when already rejected.
    pub async fn reject(
        &self,
        proposal_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<CommandProposal, CommandError> {
        let mut proposal = self.load(proposal_id).await?;

        if proposal.status == ProposalStatus::Rejected {
            return Ok(proposal);
        }
        if proposal.status != ProposalStatus::PendingApproval {
            return Err(CommandError::InvalidState {
                proposal_id,
                actual: proposal.status,
                expected: ProposalStatus::PendingApproval,
            });
        }

        proposal.status = ProposalStatus::Rejected;
        proposal.rejected_by = Some(actor.to_owned());
        proposal.rejection_reason = Some(reason.to_owned());
        proposal.record(
            "rejected",
            Some(actor),
            serde_json::json!({ "reason": reason }),
        );
        self.proposals.save(&proposal).await?;
        info!(proposal_id = %proposal_id, actor = %actor, reason = %reason, "proposal rejected");
        Ok(proposal)
    }

    /// Expire proposals whose approval window lapsed as of `now`.
    /// Returns how many.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, CommandError> {
        let mut expired = 0;
        for mut proposal in self.proposals.list_overdue(now).await? {
            proposal.status = ProposalStatus::Rejected;
            proposal.rejected_by = Some("system".to_owned());
            proposal.rejection_reason = Some("approval timeout".to_owned());
            proposal.record(
                "approval-expired",
                Some("system"),
                serde_json::json!({ "timeoutSeconds": proposal.approval_timeout_seconds }),
            );
            self.proposals.save(&proposal).await?;
            warn!(proposal_id = %proposal.proposal_id, "proposal approval expired");
            expired += 1;
        }
        Ok(expired)
    }

    /// Execute an approved proposal through its machine's driver.
    pub async fn execute(&self, proposal_id: Uuid) -> Result<CommandProposal, CommandError> {
        let mut proposal = self.load(proposal_id).await?;

        if proposal.status != ProposalStatus::Approved {
            return Err(CommandError::InvalidState {
                proposal_id,
                actual: proposal.status,
                expected: ProposalStatus::Approved,
            });
        }

        let driver = self
            .drivers
            .resolve(&proposal.command.machine_id)
            .await
            .ok_or_else(|| CommandError::NoDriver {
                machine_id: proposal.command.machine_id.clone(),
            })?;

        let started = Utc::now();
        proposal.status = ProposalStatus::Executing;
        proposal.execution_started_at = Some(started);
        proposal.record("executing", None, Value::Null);
        self.proposals.save(&proposal).await?;

        let result = driver.write_command(&proposal.command).await;

        let completed = Utc::now();
        proposal.execution_completed_at = Some(completed);
        proposal.execution_duration_ms = Some(
            completed
                .signed_duration_since(started)
                .num_milliseconds()
                .unsigned_abs(),
        );

        match result {
            Ok(dispatch) => {
                proposal.status = dispatch.status.into_proposal_status();
                proposal.outcome = Some(CommandOutcome {
                    status: dispatch.status,
                    code: None,
                    message: dispatch.message,
                    data: dispatch.data,
                });
                proposal.record(
                    "execution-finished",
                    None,
                    serde_json::json!({ "driverStatus": dispatch.status }),
                );
            }
            Err(DriverError::Unsupported { operation }) => {
                proposal.status = ProposalStatus::Failed;
                proposal.outcome = Some(CommandOutcome {
                    status: DriverStatus::Rejected,
                    code: Some(UNSUPPORTED_OPERATION.to_owned()),
                    message: Some(format!("driver does not support {operation}")),
                    data: None,
                });
                proposal.record(
                    "execution-unsupported",
                    None,
                    serde_json::json!({ "code": UNSUPPORTED_OPERATION }),
                );
            }
            Err(e) => {
                proposal.status = ProposalStatus::Failed;
                proposal.outcome = Some(CommandOutcome {
                    status: DriverStatus::Failed,
                    code: None,
                    message: Some(e.to_string()),
                    data: None,
                });
                proposal.record(
                    "execution-error",
                    None,
                    serde_json::json!({ "error": e.to_string() }),
                );
            }
        }

        self.proposals.save(&proposal).await?;
        info!(
            proposal_id = %proposal_id,
            status = %proposal.status,
            "command execution finished"
        );
        Ok(proposal)
    }

    /// Abort a command in flight. Only valid while EXECUTING.
    pub async fn abort(&self, proposal_id: Uuid) -> Result<CommandProposal, CommandError> {
        let mut proposal = self.load(proposal_id).await?;

        if proposal.status != ProposalStatus::Executing {
            return Err(CommandError::InvalidState {
                proposal_id,
                actual: proposal.status,
                expected: ProposalStatus::Executing,
            });
        }

        let driver = self
            .drivers
            .resolve(&proposal.command.machine_id)
            .await
            .ok_or_else(|| CommandError::NoDriver {
                machine_id: proposal.command.machine_id.clone(),
            })?;

        let dispatch = driver.abort_command(proposal.command.command_id).await?;

        proposal.status = ProposalStatus::Aborted;
        proposal.execution_completed_at = Some(Utc::now());
        proposal.outcome = Some(CommandOutcome {
            status: DriverStatus::Aborted,
            code: None,
            message: dispatch.message,
            data: dispatch.data,
        });
        proposal.record("aborted", None, Value::Null);
        self.proposals.save(&proposal).await?;
        warn!(proposal_id = %proposal_id, "command aborted");
        Ok(proposal)
    }

    /// Proposals waiting on approval.
    pub async fn pending(&self) -> Result<Vec<CommandProposal>, CommandError> {
        Ok(self.proposals.list_pending().await?)
    }

    /// Fetch a proposal.
    pub async fn get(&self, proposal_id: Uuid) -> Result<CommandProposal, CommandError> {
        self.load(proposal_id).await
    }

    async fn load(&self, proposal_id: Uuid) -> Result<CommandProposal, CommandError> {
        self.proposals
            .get(proposal_id)
            .await?
            .ok_or(CommandError::NotFound { proposal_id })
    }
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService").finish_non_exhaustive()
    }
}
