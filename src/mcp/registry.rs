//! Exposes the manager's aggregated MCP tools through the agent's
//! [`ToolRegistry`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::tools::{Tool, ToolRegistry, ToolSpec};
use crate::mcp::manager::McpManager;
use crate::mcp::TOOL_NAME_DELIMITER;

/// One namespaced MCP tool. Calls go back through the manager so a server
/// that stopped since registration reports "not running".
pub struct McpToolAdapter {
    manager: Arc<McpManager>,
    spec: ToolSpec,
}

impl McpToolAdapter {
    pub fn new(manager: Arc<McpManager>, spec: ToolSpec) -> Self {
        Self { manager, spec }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn execute(&self, ctx: &CancellationToken, args_json: &str) -> Result<String, String> {
        self.manager
            .call_tool(ctx, &self.spec.name, args_json)
            .await
            .map_err(|err| err.to_string())
    }
}

/// Replaces every MCP tool in `registry` with the manager's current ready
/// tools. Returns how many were registered.
pub async fn register_mcp_tools(registry: &mut ToolRegistry, manager: Arc<McpManager>) -> usize {
    for server in manager.server_names() {
        registry.remove_prefixed(&format!("{server}{TOOL_NAME_DELIMITER}"));
    }

    let specs = manager.all_tools().await;
    let count = specs.len();
    for spec in specs {
        registry.register(Arc::new(McpToolAdapter::new(manager.clone(), spec)));
    }
    debug!(tool_count = count, "Registered MCP tools");
    count
}
