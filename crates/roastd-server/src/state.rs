//! Shared application state for the `roastd` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use roastd_fabric::{CommandService, Dispatcher, Governor};
use roastd_store::{GovernanceStore, MissionStore, ProposalStore, TraceStore};

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// The mission kernel.
    pub missions: MissionStore,
    /// Trace persistence.
    pub traces: TraceStore,
    /// Raw proposal reads (rollback marking, listing).
    pub proposals: ProposalStore,
    /// The command proposal service.
    pub commands: CommandService,
    /// Governance reads and writes.
    pub governance: GovernanceStore,
    /// The autonomy governor.
    pub governor: Governor,
    /// The session-closed dispatcher (status + replay).
    pub dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
