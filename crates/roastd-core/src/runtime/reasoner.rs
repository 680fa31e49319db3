//! The reasoner capability interface.
//!
//! A reasoner decides what happens in each phase of the mission loop. The
//! runtime calls [`Reasoner::run_step`] once per phase with a read-only
//! context and merges the returned state delta. Reasoners never touch tools
//! directly; they return [`ToolInvocation`]s and the runtime executes them
//! under the policy gate.

use serde_json::{Map, Value};

use crate::error::ReasonerError;
use crate::mission::Mission;
use crate::trace::Step;

/// Mutable loop state, keyed by opaque string keys.
pub type StateMap = Map<String, Value>;

/// Read-only context handed to the reasoner for one phase.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub mission: Mission,
    /// Snapshot of the merged loop state.
    pub state: StateMap,
    /// Runtime-owned scratch: tool results from earlier phases land here
    /// under the `toolResults` key so later phases can observe them.
    pub scratch: StateMap,
    /// Zero-based loop iteration.
    pub iteration: u32,
}

/// A tool the reasoner wants invoked, in order.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: Value,
}

/// What a phase produced.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// State delta, merged last-write-wins into the loop state.
    pub new_state: StateMap,
    /// Tools to invoke, executed sequentially in this order.
    pub tool_invocations: Vec<ToolInvocation>,
    /// Declare the mission achieved; the runtime finalizes with SUCCESS
    /// after recording this phase.
    pub done: bool,
    /// Free-form note recorded on the trace entry.
    pub notes: Option<String>,
}

impl StepOutput {
    /// A phase that did nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A phase that declares the mission achieved.
    #[must_use]
    pub fn finished() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Drives one phase of the mission loop.
#[async_trait::async_trait]
pub trait Reasoner: Send + Sync {
    async fn run_step(&self, step: Step, ctx: &StepContext) -> Result<StepOutput, ReasonerError>;
}
