//! The roaster hardware seam.
//!
//! Drivers are registered per machine id. The command proposal service is
//! the only caller of `write_command`/`abort_command`; telemetry reads are
//! exposed for diagnostics. Hardware protocols themselves live behind the
//! driver implementations and are invisible to the fabric.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use roastd_core::command::{DriverStatus, RoasterCommand};

/// Errors from a driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver does not implement this operation for this machine.
    #[error("driver does not support {operation}")]
    Unsupported { operation: String },

    /// The machine link is down.
    #[error("driver connection error: {reason}")]
    Connection { reason: String },

    /// The command reached the machine and failed there.
    #[error("driver execution error: {reason}")]
    Execution { reason: String },
}

/// Result of a dispatched command.
#[derive(Debug, Clone)]
pub struct DriverResult {
    pub status: DriverStatus,
    pub message: Option<String>,
    pub data: Option<Value>,
}

/// The hardware driver contract the fabric consumes.
#[async_trait::async_trait]
pub trait RoasterDriver: Send + Sync {
    /// Establish (or re-establish) the machine link.
    async fn connect(&self) -> Result<(), DriverError>;

    /// Read a point-in-time telemetry snapshot.
    async fn read_telemetry(&self) -> Result<Value, DriverError>;

    /// Dispatch a command to the machine.
    ///
    /// Drivers that do not support the command's type return
    /// [`DriverError::Unsupported`]; the proposal service finalizes such
    /// proposals as FAILED with code `UNSUPPORTED_OPERATION`.
    async fn write_command(&self, command: &RoasterCommand) -> Result<DriverResult, DriverError>;

    /// Abort an in-flight command.
    async fn abort_command(&self, command_id: Uuid) -> Result<DriverResult, DriverError>;
}

/// Machine id → driver table.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn RoasterDriver>>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the driver for a machine.
    pub async fn register(&self, machine_id: impl Into<String>, driver: Arc<dyn RoasterDriver>) {
        self.drivers.write().await.insert(machine_id.into(), driver);
    }

    /// Resolve the driver for a machine.
    pub async fn resolve(&self, machine_id: &str) -> Option<Arc<dyn RoasterDriver>> {
        self.drivers.read().await.get(machine_id).cloned()
    }

    /// Registered machine ids, sorted.
    pub async fn machine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.drivers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry").finish_non_exhaustive()
    }
}
