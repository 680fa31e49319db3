//! Adapter from the core mission runtime to the worker's runner seam.

use std::sync::Arc;
use std::time::Duration;

use roastd_core::cancel::CancelToken;
use roastd_core::mission::Mission;
use roastd_core::runtime::{Runtime, RuntimeFailure, RuntimeOptions};
use roastd_core::trace::Trace;

use crate::worker::MissionRunner;

/// Runs missions on a fixed [`Runtime`] (reasoner + tools + policy gate).
pub struct RuntimeRunner {
    runtime: Arc<Runtime>,
    agent_id: String,
    max_iterations: u32,
}

impl RuntimeRunner {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, agent_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            runtime,
            agent_id: agent_id.into(),
            max_iterations,
        }
    }
}

#[async_trait::async_trait]
impl MissionRunner for RuntimeRunner {
    async fn run(
        &self,
        mission: &Mission,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Result<Trace, RuntimeFailure> {
        let options = RuntimeOptions {
            max_iterations: self.max_iterations,
            timeout: Some(timeout),
            cancel: Some(cancel),
            ..RuntimeOptions::new(self.agent_id.clone())
        };
        self.runtime.run_mission(mission, options).await
    }
}

impl std::fmt::Debug for RuntimeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRunner")
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}
