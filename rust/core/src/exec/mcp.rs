//! The MCP tool host contract.
//!
//! MCP server plumbing lives with the host; the core only needs a way to
//! invoke a named tool. Results are tainted by the caller.

use async_trait::async_trait;

use crate::error::{MlldError, MlldResult};

/// Invokes MCP tools on behalf of MCP-proxy executables.
#[async_trait]
pub trait McpHost: Send + Sync {
    async fn invoke(
        &self,
        tool: &str,
        args: Vec<serde_json::Value>,
    ) -> MlldResult<serde_json::Value>;
}

/// The default host: no MCP connectivity.
pub struct NoMcpHost;

#[async_trait]
impl McpHost for NoMcpHost {
    async fn invoke(
        &self,
        tool: &str,
        _args: Vec<serde_json::Value>,
    ) -> MlldResult<serde_json::Value> {
        Err(MlldError::internal(format!(
            "no MCP host configured; cannot invoke tool {tool}"
        )))
    }
}
