//! Core library for `roastd` — the autonomous-control fabric of the roaster
//! platform.
//!
//! This crate holds the domain model and the pure logic shared by every
//! fabric process:
//!
//! - **Missions** — leased, idempotency-keyed units of goal-directed work
//!   with a strict status machine ([`mission`], [`queue`]).
//! - **Traces** — the append-only record of a single mission execution
//!   attempt ([`trace`]).
//! - **Mission runtime** — the cooperative five-phase
//!   perception-reasoning-action loop with policy-gated tool calls
//!   ([`runtime`], [`policy`]).
//! - **Command governance** — roaster command proposals, the autonomy phase
//!   ladder, circuit-breaker rules, metrics, and readiness scoring
//!   ([`command`], [`governance`], [`circuit`], [`metrics`], [`readiness`]).
//!
//! Persistence, transport, and process wiring live in the sibling crates
//! (`roastd-store`, `roastd-bus`, `roastd-fabric`, `roastd-server`); this
//! crate depends on none of them.

pub mod cancel;
pub mod circuit;
pub mod command;
pub mod error;
pub mod event;
pub mod governance;
pub mod metrics;
pub mod mission;
pub mod policy;
pub mod queue;
pub mod readiness;
pub mod runtime;
pub mod trace;

pub use cancel::CancelToken;
pub use error::{EventError, PolicyError, QueueError, ReasonerError, SinkError, ToolError};
pub use mission::{Mission, MissionRequest, MissionStatus, Priority};
pub use queue::{LeaseOutcome, MissionQueue, SubmitOutcome};
pub use trace::{Step, Trace, TraceEntry, TraceStatus};
