//! Error types for `roastd-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Errors crossing a component boundary (queue, policy, tools)
//! carry a `reason` string rather than the source error type so the trait
//! seams stay object-safe and backend-agnostic.

/// Errors from mission queue backends.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No mission exists with the given id.
    #[error("mission not found: {mission_id}")]
    NotFound { mission_id: uuid::Uuid },

    /// The request was rejected before reaching the backend.
    #[error("invalid mission request: {reason}")]
    InvalidRequest { reason: String },

    /// The backing store (database, kernel HTTP endpoint) failed.
    #[error("mission queue backend error: {reason}")]
    Backend { reason: String },
}

/// Errors from trace sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The backing store failed to persist the trace.
    #[error("trace sink backend error: {reason}")]
    Backend { reason: String },
}

/// Errors from policy gates.
///
/// A policy *denial* is not an error — it is a [`crate::policy::Decision`].
/// This type covers failures to evaluate the policy at all.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy backend could not be consulted.
    #[error("policy check failed: {reason}")]
    Backend { reason: String },
}

/// Error returned by a reasoner step.
#[derive(Debug, thiserror::Error)]
#[error("reasoner step failed: {reason}")]
pub struct ReasonerError {
    pub reason: String,
}

impl ReasonerError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors from tool handlers.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool ran and failed.
    #[error("tool failed: {reason}")]
    Failed { reason: String },

    /// The tool hit a transient condition (network, broker, downstream
    /// timeout) and may succeed on a later mission attempt.
    #[error("tool transient failure: {reason}")]
    Transient { reason: String },
}

/// Errors from decoding and validating bus events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The payload was not UTF-8 JSON.
    #[error("event parse error: {reason}")]
    Parse { reason: String },

    /// The payload parsed but did not satisfy the event schema.
    #[error("event validation error: {reason}")]
    Validation { reason: String },
}

/// Errors from circuit-breaker rule parsing.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    /// The time window did not match `[0-9]+(s|m|h|d)`.
    #[error("invalid time window '{window}'")]
    InvalidWindow { window: String },

    /// The condition expression was not one of the recognized shapes.
    #[error("unrecognized condition '{condition}'")]
    UnrecognizedCondition { condition: String },
}
