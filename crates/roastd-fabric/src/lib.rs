//! The moving parts of the `roastd` control fabric.
//!
//! - [`dispatcher`] — turns `session.closed` bus events into idempotent
//!   mission submissions.
//! - [`worker`] — claims mission leases, heartbeats, runs the mission
//!   runtime, and reports outcomes.
//! - [`kernel_client`] — the mission kernel verb set over HTTP, for
//!   processes that do not own the database.
//! - [`driver`] — the roaster hardware seam and per-machine registry.
//! - [`commands`] — the command proposal service and its approval state
//!   machine.
//! - [`governor`] — metrics collection, readiness scoring, the circuit
//!   breaker, and weekly scope-expansion proposals.

pub mod commands;
pub mod dispatcher;
pub mod driver;
pub mod governor;
pub mod kernel_client;
pub mod runner;
pub mod worker;

pub use commands::{CommandError, CommandService, ProposeRequest};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStatus, ReplayError};
pub use driver::{DriverError, DriverRegistry, DriverResult, RoasterDriver};
pub use governor::{AlertSink, Governor, GovernorError, TracingAlertSink};
pub use kernel_client::KernelClient;
pub use runner::RuntimeRunner;
pub use worker::{MissionRunner, ReportIndex, Worker, WorkerConfig, WorkerStats};
