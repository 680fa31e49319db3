//! Default mission agent wiring: the post-roast report reasoner and its
//! tool set.
//!
//! The runtime is generic over reasoners and tools; this module provides
//! the one agent the control plane ships with — it drives the
//! `generate-roast-report` goal through the five phases and invokes the
//! report renderer as a policy-gated tool.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use roastd_core::error::{ReasonerError, ToolError};
use roastd_core::policy::ToolAllowlistGate;
use roastd_core::runtime::{
    Reasoner, Runtime, StepContext, StepOutput, ToolContext, ToolHandler, ToolInvocation,
    ToolRegistry,
};
use roastd_core::trace::Step;

/// The tool name the report reasoner invokes on ACT.
pub const RENDER_REPORT_TOOL: &str = "render-report";

/// Drives a session's post-roast report mission through the loop.
///
/// GET_MISSION lifts the session identity out of the mission params, SCAN
/// and THINK stage the work, ACT invokes the renderer, and OBSERVE declares
/// the mission done once a render result is visible in the scratch space.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoastReportReasoner;

#[async_trait::async_trait]
impl Reasoner for RoastReportReasoner {
    async fn run_step(&self, step: Step, ctx: &StepContext) -> Result<StepOutput, ReasonerError> {
        let mut output = StepOutput::empty();

        match step {
            Step::GetMission => {
                let session_id = ctx.mission.session_id().ok_or_else(|| {
                    ReasonerError::new("mission carries no sessionId param")
                })?;
                let report_kind = ctx
                    .mission
                    .params
                    .get("reportKind")
                    .and_then(Value::as_str)
                    .unwrap_or(roastd_core::event::DEFAULT_REPORT_KIND);
                output
                    .new_state
                    .insert("sessionId".to_owned(), Value::String(session_id.to_owned()));
                output.new_state.insert(
                    "reportKind".to_owned(),
                    Value::String(report_kind.to_owned()),
                );
            }
            Step::Scan => {
                output.notes = Some("session telemetry located".to_owned());
            }
            Step::Think => {
                output.notes = Some("rendering plan prepared".to_owned());
            }
            Step::Act => {
                output.tool_invocations = vec![ToolInvocation {
                    tool: RENDER_REPORT_TOOL.to_owned(),
                    input: serde_json::json!({
                        "sessionId": ctx.state.get("sessionId"),
                        "reportKind": ctx.state.get("reportKind"),
                    }),
                }];
            }
            Step::Observe => {
                let rendered = ctx
                    .scratch
                    .get("toolResults")
                    .and_then(Value::as_array)
                    .is_some_and(|results| {
                        results.iter().any(|r| !r["output"].is_null())
                    });
                if rendered {
                    output.done = true;
                    output.notes = Some("report rendered".to_owned());
                } else {
                    output.notes = Some("no render result yet; retrying".to_owned());
                }
            }
        }

        Ok(output)
    }
}

/// Produces the post-roast report envelope for a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderReportTool;

#[async_trait::async_trait]
impl ToolHandler for RenderReportTool {
    async fn invoke(&self, input: &Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let session_id = input
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Failed {
                reason: "render-report requires sessionId".to_owned(),
            })?;
        let report_kind = input
            .get("reportKind")
            .and_then(Value::as_str)
            .unwrap_or(roastd_core::event::DEFAULT_REPORT_KIND);

        Ok(serde_json::json!({
            "reportId": format!("rep-{}", Uuid::new_v4()),
            "sessionId": session_id,
            "reportKind": report_kind,
            "renderedAt": chrono::Utc::now(),
        }))
    }
}

/// Build the default report runtime: the report reasoner, its renderer
/// tool, and an allowlist gate scoped to exactly that tool.
#[must_use]
pub fn build_report_runtime() -> Runtime {
    let tools = ToolRegistry::builder()
        .register(RENDER_REPORT_TOOL, Arc::new(RenderReportTool))
        .build();
    Runtime::new(
        Arc::new(RoastReportReasoner),
        tools,
        Arc::new(ToolAllowlistGate::new([RENDER_REPORT_TOOL])),
    )
}
