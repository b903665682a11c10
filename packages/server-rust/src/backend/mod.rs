//! Backend connections: the handle the dispatch engine holds for each
//! configured MCP server, and the transports behind it.
//!
//! - [`stdio`]: child process, newline-delimited JSON-RPC
//! - [`http`]: streamable HTTP (one POST per message)
//! - [`sse`]: legacy HTTP+SSE (GET event stream plus POST endpoint)
//! - [`init`]: one-shot connection pass that builds the registry snapshot

pub mod event_stream;
pub mod http;
pub mod init;
pub mod pending;
pub mod policy;
pub mod rpc;
pub mod sse;
pub mod stdio;

use std::fmt;
use std::sync::Arc;

use relay_core::Tool;
use serde_json::{Map, Value};

pub use init::{build_snapshot, connect_backend, spawn_initialization};
pub use policy::ToolPolicy;

use crate::traits::BackendClient;

/// A live backend as installed in the registry.
///
/// Owns the client; the policy is applied on every catalog fetch so the
/// dispatch engine only ever sees permitted tools.
pub struct BackendHandle {
    name: String,
    client: Arc<dyn BackendClient>,
    policy: ToolPolicy,
}

impl BackendHandle {
    pub fn new(name: impl Into<String>, client: Arc<dyn BackendClient>, policy: ToolPolicy) -> Self {
        Self {
            name: name.into(),
            client,
            policy,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    #[must_use]
    pub fn is_allowed(&self, tool: &str) -> bool {
        self.policy.is_allowed(tool)
    }

    /// Fetches the backend's catalog with disallowed tools removed.
    ///
    /// # Errors
    ///
    /// Propagates the client's failure.
    pub async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        let mut tools = self.client.list_tools().await?;
        if !self.policy.is_open() {
            tools.retain(|tool| self.policy.is_allowed(&tool.name));
        }
        Ok(tools)
    }

    /// Forwards a call to the client. Policy checks are the caller's job.
    ///
    /// # Errors
    ///
    /// Propagates the client's failure.
    pub async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> anyhow::Result<Value> {
        self.client.call_tool(tool, arguments).await
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
