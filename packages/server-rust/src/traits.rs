use async_trait::async_trait;
use relay_core::Tool;
use serde_json::{Map, Value};

/// A connected MCP backend that can publish its tool catalog and run a tool.
///
/// Implementations: stdio subprocess, streamable HTTP, legacy HTTP+SSE,
/// and a scripted mock (tests). Dropping a returned future abandons the call.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetch the backend's complete tool catalog, in the backend's own order.
    async fn list_tools(&self) -> anyhow::Result<Vec<Tool>>;

    /// Invoke one tool and return the backend's raw `result` payload.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<Value>;
}
