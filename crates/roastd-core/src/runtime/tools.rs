//! Tool registry.
//!
//! Tools are registered by name at construction; the registry is immutable
//! afterwards. The runtime looks handlers up per invocation and records a
//! `ToolNotFound` error on the trace when a reasoner names a tool that was
//! never registered.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::ToolError;

/// Context handed to a tool handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub mission_id: Uuid,
    pub agent_id: String,
    /// Handlers are expected to return promptly once this trips.
    pub cancel: CancelToken,
    /// Snapshot of the loop state at invocation time.
    pub state: Map<String, Value>,
}

/// A named tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, input: &Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Immutable name → handler table.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<BTreeMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder {
            tools: BTreeMap::new(),
        }
    }

    /// Look up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// Builder for [`ToolRegistry`].
pub struct ToolRegistryBuilder {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistryBuilder {
    /// Register a handler under a name. A repeated name replaces the
    /// earlier handler.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(name.into(), handler);
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: Arc::new(self.tools),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        async fn invoke(&self, input: &Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(input.clone())
        }
    }

    #[test]
    fn lookup_finds_registered_tools_only() {
        let registry = ToolRegistry::builder()
            .register("echo", Arc::new(Echo))
            .build();

        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }
}
