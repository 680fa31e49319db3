//! Policy gate for tool invocations.
//!
//! Before every tool call the mission runtime builds a [`PolicyRequest`] and
//! asks the gate for a decision. A denial is not an error: the runtime
//! records the denied call on the trace and continues with the next
//! invocation.
//!
//! Gates are capability interfaces so deployments can plug in anything from
//! a static whitelist to a remote policy service.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PolicyError;

/// A request to invoke a tool on behalf of a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    pub agent_id: String,
    pub tool: String,
    /// The verb being gated; the runtime always sends `invoke`.
    pub action: String,
    /// The resource acted on — the mission's subject when set, otherwise
    /// the mission id.
    pub resource: String,
    pub mission_id: Uuid,
    #[serde(default)]
    pub context: Value,
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
}

/// The outcome of a policy check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResult {
    pub request: PolicyRequest,
    pub decision: Decision,
    pub checked_at: DateTime<Utc>,
    /// Which rules were violated, when denied.
    #[serde(default)]
    pub violations: Vec<String>,
}

impl PolicyResult {
    #[must_use]
    pub fn allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// The allow/deny oracle consulted before each tool invocation.
#[async_trait::async_trait]
pub trait PolicyGate: Send + Sync {
    async fn check(&self, request: &PolicyRequest) -> Result<PolicyResult, PolicyError>;
}

/// A gate that allows everything. Development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

#[async_trait::async_trait]
impl PolicyGate for AllowAllGate {
    async fn check(&self, request: &PolicyRequest) -> Result<PolicyResult, PolicyError> {
        Ok(PolicyResult {
            request: request.clone(),
            decision: Decision::Allow,
            checked_at: Utc::now(),
            violations: Vec::new(),
        })
    }
}

/// A gate that allows only an enumerated set of tools.
#[derive(Debug, Clone, Default)]
pub struct ToolAllowlistGate {
    allowed: BTreeSet<String>,
}

impl ToolAllowlistGate {
    #[must_use]
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: tools.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
impl PolicyGate for ToolAllowlistGate {
    async fn check(&self, request: &PolicyRequest) -> Result<PolicyResult, PolicyError> {
        let allowed = self.allowed.contains(&request.tool);
        Ok(PolicyResult {
            request: request.clone(),
            decision: if allowed {
                Decision::Allow
            } else {
                Decision::Deny
            },
            checked_at: Utc::now(),
            violations: if allowed {
                Vec::new()
            } else {
                vec![format!("tool '{}' is not in the allowlist", request.tool)]
            },
        })
    }
}
