//! The mission runtime: a cooperative, bounded perception-reasoning-action
//! loop.
//!
//! One call to [`Runtime::run_mission`] executes one mission attempt. The
//! runtime iterates up to `max_iterations` loops; each loop runs the five
//! phases in order (`GET_MISSION`, `SCAN`, `THINK`, `ACT`, `OBSERVE`). Per
//! phase it consults the reasoner, merges the returned state delta
//! (last-write-wins), then executes the requested tool invocations
//! sequentially, each one behind the policy gate.
//!
//! Scheduling is single-threaded cooperative: one phase or one tool call is
//! active at a time. Cancellation and the mission timeout are checked before
//! every phase, before every tool call, and around every suspension point
//! (reasoner steps, policy checks, tool handlers).
//!
//! Whatever the terminal status, the trace is emitted: successful runs
//! return it, failed runs attach it to the error.

pub mod reasoner;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::mission::Mission;
use crate::policy::{PolicyGate, PolicyRequest};
use crate::trace::{EntryStatus, Step, ToolCall, Trace, TraceEntry, TraceMetadata, TraceStatus};

pub use reasoner::{Reasoner, StateMap, StepContext, StepOutput, ToolInvocation};
pub use tools::{ToolContext, ToolHandler, ToolRegistry, ToolRegistryBuilder};

/// Default loop iteration bound.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Why a mission attempt did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// The mission timeout elapsed.
    #[error("mission timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// External cancellation was requested.
    #[error("mission execution cancelled")]
    Cancelled,

    /// A phase failed fatally (reasoner error, tool failure, unknown tool).
    #[error("step {step} failed: {reason}")]
    Step { step: Step, reason: String },
}

impl RuntimeError {
    /// Whether a retry on a fresh attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}

/// A failed mission attempt with its trace attached.
///
/// The trace is emitted in every terminal case; failure paths carry it here
/// so callers can persist it before reporting the mission outcome.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RuntimeFailure {
    pub error: RuntimeError,
    pub trace: Trace,
}

/// Options for one mission attempt.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub agent_id: String,
    pub max_iterations: u32,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub initial_state: StateMap,
}

impl RuntimeOptions {
    /// Options with defaults for everything but the agent id.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: None,
            cancel: None,
            initial_state: StateMap::new(),
        }
    }
}

/// Why a suspension point was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

/// Executes missions against a fixed reasoner, tool registry, and policy
/// gate. The registry is immutable after construction.
pub struct Runtime {
    reasoner: Arc<dyn Reasoner>,
    tools: ToolRegistry,
    policy: Arc<dyn PolicyGate>,
}

impl Runtime {
    #[must_use]
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        tools: ToolRegistry,
        policy: Arc<dyn PolicyGate>,
    ) -> Self {
        Self {
            reasoner,
            tools,
            policy,
        }
    }

    /// Execute one mission attempt and emit its trace.
    ///
    /// # Errors
    ///
    /// [`RuntimeFailure`] on timeout, cancellation, or a fatal step error.
    /// The failure carries the trace.
    pub async fn run_mission(
        &self,
        mission: &Mission,
        options: RuntimeOptions,
    ) -> Result<Trace, RuntimeFailure> {
        let run = RunState {
            trace_id: Uuid::new_v4(),
            loop_id: Uuid::new_v4(),
            agent_id: options.agent_id,
            started_at: Utc::now(),
            start_instant: Instant::now(),
            deadline: options.timeout.map(|t| Instant::now() + t),
            cancel: options.cancel.unwrap_or_default(),
            entries: Vec::new(),
            iterations: 0,
        };
        self.drive(mission, options.max_iterations, options.initial_state, run)
            .await
    }

    async fn drive(
        &self,
        mission: &Mission,
        max_iterations: u32,
        initial_state: StateMap,
        mut run: RunState,
    ) -> Result<Trace, RuntimeFailure> {
        let mut state = initial_state;
        let mut scratch = StateMap::new();

        for iteration in 0..max_iterations {
            run.iterations = iteration + 1;

            for step in Step::ALL {
                if let Some(interrupt) = run.tripped() {
                    return Err(run.finalize_interrupt(mission, interrupt));
                }

                let entry_started = Utc::now();
                let ctx = StepContext {
                    mission: mission.clone(),
                    state: state.clone(),
                    scratch: scratch.clone(),
                    iteration,
                };

                let output = match run.guard(self.reasoner.run_step(step, &ctx)).await {
                    Ok(Ok(output)) => output,
                    Ok(Err(err)) => {
                        run.push_entry(mission, iteration, step, entry_started, Vec::new(),
                            EntryStatus::Error, Some(err.reason.clone()));
                        return Err(run.finalize_step_error(mission, step, err.reason));
                    }
                    Err(interrupt) => {
                        run.push_entry(mission, iteration, step, entry_started, Vec::new(),
                            EntryStatus::Error, Some(interrupt_note(interrupt).to_owned()));
                        return Err(run.finalize_interrupt(mission, interrupt));
                    }
                };

                for (key, value) in output.new_state {
                    state.insert(key, value);
                }

                let mut tool_calls = Vec::new();
                let mut step_error = None;

                for invocation in output.tool_invocations {
                    if let Some(interrupt) = run.tripped() {
                        run.push_entry(mission, iteration, step, entry_started, tool_calls,
                            EntryStatus::Error, Some(interrupt_note(interrupt).to_owned()));
                        return Err(run.finalize_interrupt(mission, interrupt));
                    }

                    match self
                        .invoke_tool(mission, &run, &invocation, &state)
                        .await
                    {
                        ToolOutcome::Call(call) => {
                            let fatal = call.error.clone();
                            tool_calls.push(call);
                            if let Some(reason) = fatal {
                                step_error = Some(reason);
                                break;
                            }
                        }
                        ToolOutcome::Interrupted(interrupt, call) => {
                            tool_calls.push(call);
                            run.push_entry(mission, iteration, step, entry_started, tool_calls,
                                EntryStatus::Error, Some(interrupt_note(interrupt).to_owned()));
                            return Err(run.finalize_interrupt(mission, interrupt));
                        }
                    }
                }

                // Make this phase's tool results observable to later phases.
                if !tool_calls.is_empty() {
                    let results: Vec<Value> = tool_calls
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "tool": c.tool_name,
                                "output": c.output,
                                "denied": c.denied_by_policy,
                                "error": c.error,
                            })
                        })
                        .collect();
                    scratch.insert("toolResults".to_owned(), Value::Array(results));
                }

                let status = if step_error.is_some() {
                    EntryStatus::Error
                } else {
                    EntryStatus::Success
                };
                run.push_entry(mission, iteration, step, entry_started, tool_calls, status,
                    output.notes.clone());

                if let Some(reason) = step_error {
                    return Err(run.finalize_step_error(mission, step, reason));
                }

                if output.done {
                    debug!(
                        mission_id = %mission.mission_id,
                        iteration,
                        step = %step,
                        "mission declared done"
                    );
                    return Ok(run.finalize(mission, TraceStatus::Success, None));
                }
            }
        }

        Ok(run.finalize(mission, TraceStatus::MaxIterations, None))
    }

    async fn invoke_tool(
        &self,
        mission: &Mission,
        run: &RunState,
        invocation: &ToolInvocation,
        state: &StateMap,
    ) -> ToolOutcome {
        let request = PolicyRequest {
            agent_id: run.agent_id.clone(),
            tool: invocation.tool.clone(),
            action: "invoke".to_owned(),
            resource: mission
                .subject_id
                .clone()
                .unwrap_or_else(|| mission.mission_id.to_string()),
            mission_id: mission.mission_id,
            context: mission.context.clone(),
        };

        let call_start = Instant::now();
        let base_call = |duration_ms| ToolCall {
            tool_name: invocation.tool.clone(),
            input: invocation.input.clone(),
            output: None,
            duration_ms,
            denied_by_policy: false,
            error: None,
        };

        let decision = match run.guard(self.policy.check(&request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                let mut call = base_call(elapsed_ms(call_start));
                call.error = Some(format!("policy check failed: {err}"));
                return ToolOutcome::Call(call);
            }
            Err(interrupt) => {
                let mut call = base_call(elapsed_ms(call_start));
                call.error = Some(interrupt_note(interrupt).to_owned());
                return ToolOutcome::Interrupted(interrupt, call);
            }
        };

        if !decision.allowed() {
            debug!(
                mission_id = %mission.mission_id,
                tool = %invocation.tool,
                violations = ?decision.violations,
                "tool invocation denied by policy"
            );
            let mut call = base_call(elapsed_ms(call_start));
            call.denied_by_policy = true;
            return ToolOutcome::Call(call);
        }

        let Some(handler) = self.tools.get(&invocation.tool) else {
            let mut call = base_call(elapsed_ms(call_start));
            call.error = Some(format!("tool not found: {}", invocation.tool));
            return ToolOutcome::Call(call);
        };

        let ctx = ToolContext {
            mission_id: mission.mission_id,
            agent_id: run.agent_id.clone(),
            cancel: run.cancel.clone(),
            state: state.clone(),
        };

        match run.guard(handler.invoke(&invocation.input, &ctx)).await {
            Ok(Ok(output)) => {
                let mut call = base_call(elapsed_ms(call_start));
                call.output = Some(output);
                ToolOutcome::Call(call)
            }
            Ok(Err(err)) => {
                let mut call = base_call(elapsed_ms(call_start));
                call.error = Some(err.to_string());
                ToolOutcome::Call(call)
            }
            Err(interrupt) => {
                let mut call = base_call(elapsed_ms(call_start));
                call.error = Some(interrupt_note(interrupt).to_owned());
                ToolOutcome::Interrupted(interrupt, call)
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tools", &self.tools.names())
            .finish_non_exhaustive()
    }
}

/// Outcome of one tool invocation from the loop's point of view.
enum ToolOutcome {
    /// The call finished (success, denial, or fatal error — recorded on the
    /// call itself).
    Call(ToolCall),
    /// Timeout/cancel tripped mid-call.
    Interrupted(Interrupt, ToolCall),
}

/// Per-attempt bookkeeping.
struct RunState {
    trace_id: Uuid,
    loop_id: Uuid,
    agent_id: String,
    started_at: chrono::DateTime<Utc>,
    start_instant: Instant,
    deadline: Option<Instant>,
    cancel: CancelToken,
    entries: Vec<TraceEntry>,
    iterations: u32,
}

impl RunState {
    /// Non-blocking interrupt check, used before each phase and tool call.
    fn tripped(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(Interrupt::Timeout);
            }
        }
        None
    }

    /// Run a suspension point under the timeout and cancel signal.
    async fn guard<F, T>(&self, fut: F) -> Result<T, Interrupt>
    where
        F: std::future::Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => tokio::select! {
                result = fut => Ok(result),
                () = self.cancel.cancelled() => Err(Interrupt::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(Interrupt::Timeout),
            },
            None => tokio::select! {
                result = fut => Ok(result),
                () = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_entry(
        &mut self,
        mission: &Mission,
        iteration: u32,
        step: Step,
        started_at: chrono::DateTime<Utc>,
        tool_calls: Vec<ToolCall>,
        status: EntryStatus,
        notes: Option<String>,
    ) {
        self.entries.push(TraceEntry {
            mission_id: mission.mission_id,
            loop_id: self.loop_id,
            iteration,
            step,
            status,
            started_at,
            completed_at: Utc::now(),
            tool_calls,
            notes,
        });
    }

    fn finalize(&mut self, mission: &Mission, status: TraceStatus, error: Option<String>) -> Trace {
        Trace {
            trace_id: self.trace_id,
            agent_id: self.agent_id.clone(),
            mission_id: mission.mission_id,
            status,
            started_at: self.started_at,
            completed_at: Utc::now(),
            entries: std::mem::take(&mut self.entries),
            metadata: TraceMetadata {
                loop_id: self.loop_id,
                iterations: self.iterations,
            },
            error,
        }
    }

    fn finalize_interrupt(&mut self, mission: &Mission, interrupt: Interrupt) -> RuntimeFailure {
        let error = match interrupt {
            Interrupt::Timeout => RuntimeError::Timeout {
                elapsed_ms: elapsed_ms(self.start_instant),
            },
            Interrupt::Cancelled => RuntimeError::Cancelled,
        };
        let status = match interrupt {
            Interrupt::Timeout => TraceStatus::Timeout,
            Interrupt::Cancelled => TraceStatus::Aborted,
        };
        warn!(
            mission_id = %mission.mission_id,
            status = ?status,
            "mission attempt interrupted"
        );
        let trace = self.finalize(mission, status, Some(error.to_string()));
        RuntimeFailure { error, trace }
    }

    fn finalize_step_error(
        &mut self,
        mission: &Mission,
        step: Step,
        reason: String,
    ) -> RuntimeFailure {
        warn!(
            mission_id = %mission.mission_id,
            step = %step,
            reason = %reason,
            "mission step failed"
        );
        let error = RuntimeError::Step { step, reason };
        let trace = self.finalize(mission, TraceStatus::Error, Some(error.to_string()));
        RuntimeFailure { error, trace }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn interrupt_note(interrupt: Interrupt) -> &'static str {
    match interrupt {
        Interrupt::Timeout => "mission timeout elapsed",
        Interrupt::Cancelled => "cancellation requested",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::{ReasonerError, ToolError};
    use crate::mission::MissionRequest;
    use crate::policy::{AllowAllGate, ToolAllowlistGate};

    fn mission() -> Mission {
        Mission::from_request(
            MissionRequest {
                params: serde_json::json!({ "sessionId": "sess-1" }),
                ..MissionRequest::new("generate-roast-report")
            },
            Utc::now(),
        )
    }

    /// Reasoner scripted per test: optionally sleeps, fails, invokes tools
    /// on ACT, and declares done on a chosen (iteration, step).
    #[derive(Default)]
    struct Scripted {
        sleep: Option<Duration>,
        fail_on: Option<Step>,
        act_invocations: Vec<(String, Value)>,
        done_on: Option<(u32, Step)>,
    }

    #[async_trait::async_trait]
    impl Reasoner for Scripted {
        async fn run_step(
            &self,
            step: Step,
            ctx: &StepContext,
        ) -> Result<StepOutput, ReasonerError> {
            if let Some(sleep) = self.sleep {
                tokio::time::sleep(sleep).await;
            }
            if self.fail_on == Some(step) {
                return Err(ReasonerError::new("scripted failure"));
            }
            let mut output = StepOutput::empty();
            if step == Step::Act {
                output.tool_invocations = self
                    .act_invocations
                    .iter()
                    .map(|(tool, input)| ToolInvocation {
                        tool: tool.clone(),
                        input: input.clone(),
                    })
                    .collect();
            }
            if self.done_on == Some((ctx.iteration, step)) {
                output.done = true;
            }
            Ok(output)
        }
    }

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ToolHandler for Counting {
        async fn invoke(&self, _input: &Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn runtime(reasoner: Scripted, tools: ToolRegistry) -> Runtime {
        Runtime::new(Arc::new(reasoner), tools, Arc::new(AllowAllGate))
    }

    #[tokio::test]
    async fn done_on_first_observe_yields_five_entries() {
        let rt = runtime(
            Scripted {
                done_on: Some((0, Step::Observe)),
                ..Scripted::default()
            },
            ToolRegistry::builder().build(),
        );

        let trace = rt
            .run_mission(&mission(), RuntimeOptions::new("agent-1"))
            .await
            .unwrap();

        assert_eq!(trace.status, TraceStatus::Success);
        assert_eq!(trace.entries.len(), 5);
        assert_eq!(trace.metadata.iterations, 1);
        let steps: Vec<Step> = trace.entries.iter().map(|e| e.step).collect();
        assert_eq!(steps, Step::ALL.to_vec());
        for entry in &trace.entries {
            assert!(entry.started_at <= entry.completed_at);
        }
    }

    #[tokio::test]
    async fn exhausting_iterations_yields_max_iterations() {
        let rt = runtime(Scripted::default(), ToolRegistry::builder().build());

        let trace = rt
            .run_mission(
                &mission(),
                RuntimeOptions {
                    max_iterations: 2,
                    ..RuntimeOptions::new("agent-1")
                },
            )
            .await
            .unwrap();

        assert_eq!(trace.status, TraceStatus::MaxIterations);
        assert_eq!(trace.entries.len(), 10);
        assert_eq!(trace.metadata.iterations, 2);
    }

    #[tokio::test]
    async fn denied_tool_is_recorded_and_allowed_tool_still_runs() {
        let counting = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let tools = ToolRegistry::builder()
            .register("allowed", Arc::clone(&counting) as Arc<dyn ToolHandler>)
            .build();
        let rt = Runtime::new(
            Arc::new(Scripted {
                act_invocations: vec![
                    ("denied".to_owned(), Value::Null),
                    ("allowed".to_owned(), Value::Null),
                ],
                done_on: Some((0, Step::Observe)),
                ..Scripted::default()
            }),
            tools,
            Arc::new(ToolAllowlistGate::new(["allowed"])),
        );

        let trace = rt
            .run_mission(&mission(), RuntimeOptions::new("agent-1"))
            .await
            .unwrap();

        let act = trace
            .entries
            .iter()
            .find(|e| e.step == Step::Act)
            .unwrap();
        assert_eq!(act.tool_calls.len(), 2);
        assert!(act.tool_calls[0].denied_by_policy);
        assert!(act.tool_calls[0].output.is_none());
        assert!(!act.tool_calls[1].denied_by_policy);
        assert!(act.tool_calls[1].output.is_some());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_fatal_step_error() {
        let rt = runtime(
            Scripted {
                act_invocations: vec![("missing".to_owned(), Value::Null)],
                ..Scripted::default()
            },
            ToolRegistry::builder().build(),
        );

        let failure = rt
            .run_mission(&mission(), RuntimeOptions::new("agent-1"))
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            RuntimeError::Step { step: Step::Act, .. }
        ));
        assert_eq!(failure.trace.status, TraceStatus::Error);
        let act = failure
            .trace
            .entries
            .iter()
            .find(|e| e.step == Step::Act)
            .unwrap();
        assert_eq!(act.status, EntryStatus::Error);
        assert!(act.tool_calls[0]
            .error
            .as_deref()
            .unwrap()
            .contains("tool not found"));
    }

    #[tokio::test]
    async fn tool_failure_terminates_the_step() {
        struct Exploding;

        #[async_trait::async_trait]
        impl ToolHandler for Exploding {
            async fn invoke(&self, _: &Value, _: &ToolContext) -> Result<Value, ToolError> {
                Err(ToolError::Failed {
                    reason: "boom".to_owned(),
                })
            }
        }

        let rt = runtime(
            Scripted {
                act_invocations: vec![("exploding".to_owned(), Value::Null)],
                ..Scripted::default()
            },
            ToolRegistry::builder()
                .register("exploding", Arc::new(Exploding))
                .build(),
        );

        let failure = rt
            .run_mission(&mission(), RuntimeOptions::new("agent-1"))
            .await
            .unwrap_err();
        assert_eq!(failure.trace.status, TraceStatus::Error);
        assert!(failure.error.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn slow_reasoner_hits_timeout_with_trace_attached() {
        let rt = runtime(
            Scripted {
                sleep: Some(Duration::from_millis(50)),
                ..Scripted::default()
            },
            ToolRegistry::builder().build(),
        );

        let failure = rt
            .run_mission(
                &mission(),
                RuntimeOptions {
                    timeout: Some(Duration::from_millis(10)),
                    ..RuntimeOptions::new("agent-1")
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, RuntimeError::Timeout { .. }));
        assert!(failure.error.is_retryable());
        assert_eq!(failure.trace.status, TraceStatus::Timeout);
        // The interrupted phase is still on the trace.
        assert_eq!(failure.trace.entries.len(), 1);
        assert_eq!(failure.trace.entries[0].status, EntryStatus::Error);
    }

    #[tokio::test]
    async fn pre_cancelled_run_aborts_before_any_phase() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let rt = runtime(Scripted::default(), ToolRegistry::builder().build());

        let failure = rt
            .run_mission(
                &mission(),
                RuntimeOptions {
                    cancel: Some(cancel),
                    ..RuntimeOptions::new("agent-1")
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, RuntimeError::Cancelled));
        assert_eq!(failure.trace.status, TraceStatus::Aborted);
        assert!(failure.trace.entries.is_empty());
    }

    #[tokio::test]
    async fn reasoner_error_emits_entry_and_error_trace() {
        let rt = runtime(
            Scripted {
                fail_on: Some(Step::Think),
                ..Scripted::default()
            },
            ToolRegistry::builder().build(),
        );

        let failure = rt
            .run_mission(&mission(), RuntimeOptions::new("agent-1"))
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            RuntimeError::Step { step: Step::Think, .. }
        ));
        // GET_MISSION, SCAN succeeded; THINK recorded as the failing entry.
        assert_eq!(failure.trace.entries.len(), 3);
        assert_eq!(failure.trace.entries[2].status, EntryStatus::Error);
    }

    #[tokio::test]
    async fn state_merge_is_last_write_wins() {
        struct Writer;

        #[async_trait::async_trait]
        impl Reasoner for Writer {
            async fn run_step(
                &self,
                step: Step,
                ctx: &StepContext,
            ) -> Result<StepOutput, ReasonerError> {
                let mut output = StepOutput::empty();
                output
                    .new_state
                    .insert("phase".to_owned(), Value::String(step.to_string()));
                if step == Step::Observe {
                    // Earlier phases' writes must be visible here.
                    assert_eq!(
                        ctx.state.get("phase").and_then(Value::as_str),
                        Some("ACT")
                    );
                    output.done = true;
                }
                Ok(output)
            }
        }

        let rt = Runtime::new(
            Arc::new(Writer),
            ToolRegistry::builder().build(),
            Arc::new(AllowAllGate),
        );
        let trace = rt
            .run_mission(&mission(), RuntimeOptions::new("agent-1"))
            .await
            .unwrap();
        assert_eq!(trace.status, TraceStatus::Success);
    }
}
