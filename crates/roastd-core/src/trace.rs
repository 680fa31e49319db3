//! Mission execution traces.
//!
//! A trace is the append-only record of a single mission execution attempt:
//! one entry per completed phase, each entry carrying the tool calls made
//! during that phase. Exactly one trace is emitted per attempt, whatever the
//! terminal status — success, exhaustion, timeout, abort, or error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SinkError;

/// The five ordered phases of the mission loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    GetMission,
    Scan,
    Think,
    Act,
    Observe,
}

impl Step {
    /// All phases in execution order.
    pub const ALL: [Self; 5] = [
        Self::GetMission,
        Self::Scan,
        Self::Think,
        Self::Act,
        Self::Observe,
    ];
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GetMission => "GET_MISSION",
            Self::Scan => "SCAN",
            Self::Think => "THINK",
            Self::Act => "ACT",
            Self::Observe => "OBSERVE",
        };
        f.write_str(s)
    }
}

/// Terminal status of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceStatus {
    Success,
    MaxIterations,
    Timeout,
    Aborted,
    Error,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::MaxIterations => "MAX_ITERATIONS",
            Self::Timeout => "TIMEOUT",
            Self::Aborted => "ABORTED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Status of a single trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Success,
    Error,
}

/// One tool invocation inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    pub input: Value,
    /// Present only when the tool ran and returned. A policy denial leaves
    /// it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub duration_ms: u64,
    #[serde(default)]
    pub denied_by_policy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed (or interrupted) phase of one loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub mission_id: Uuid,
    pub loop_id: Uuid,
    pub iteration: u32,
    pub step: Step,
    pub status: EntryStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Loop-level metadata attached to a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    pub loop_id: Uuid,
    /// Number of loop iterations entered.
    pub iterations: u32,
}

/// The record of a single mission execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_id: Uuid,
    pub agent_id: String,
    pub mission_id: Uuid,
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub entries: Vec<TraceEntry>,
    pub metadata: TraceMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Destination for finished traces.
///
/// Trace submission is best-effort from the worker's point of view: a sink
/// failure is logged and never blocks mission completion.
#[async_trait::async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, trace: &Trace) -> Result<(), SinkError>;
}

/// A sink that keeps traces in memory, for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    traces: std::sync::Arc<tokio::sync::Mutex<Vec<Trace>>>,
}

impl MemoryTraceSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn traces(&self) -> Vec<Trace> {
        self.traces.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl TraceSink for MemoryTraceSink {
    async fn record(&self, trace: &Trace) -> Result<(), SinkError> {
        self.traces.lock().await.push(trace.clone());
        Ok(())
    }
}
