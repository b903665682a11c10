//! Subprocess backend speaking newline-delimited JSON-RPC over stdio.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_core::{JsonRpcRequest, Params, Tool};
use serde_json::{Map, Value};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use super::pending::PendingRequests;
use super::rpc::{self, RpcChannel};
use crate::traits::BackendClient;

/// Longest single line accepted from a backend's stdout or stderr.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// A backend running as a child process.
///
/// The child is killed when this value is dropped.
pub struct StdioBackend {
    name: String,
    writer: Mutex<FramedWrite<ChildStdin, LinesCodec>>,
    pending: Arc<PendingRequests>,
    tasks: Vec<JoinHandle<()>>,
    _child: Child,
}

impl StdioBackend {
    /// Spawns `command args...` with `env` layered on the relay's own
    /// environment and starts the stdout/stderr reader tasks.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be started.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start backend {name}: {command}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("backend {name}: stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("backend {name}: stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("backend {name}: stderr not captured"))?;

        let pending = PendingRequests::new();

        let reader = {
            let name = name.to_string();
            let pending = Arc::clone(&pending);
            let mut lines =
                FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
            tokio::spawn(async move {
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) if line.trim().is_empty() => {}
                        Ok(line) => {
                            if let Some(response) = rpc::parse_response(&line) {
                                if !pending.complete(response) {
                                    debug!(backend = %name, "response for unknown or abandoned request");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(backend = %name, error = %e, "failed to read backend stdout");
                            break;
                        }
                    }
                }
                debug!(backend = %name, "backend stdout closed");
                pending.close();
            })
        };

        let stderr_task = {
            let name = name.to_string();
            let mut lines =
                FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
            tokio::spawn(async move {
                while let Some(Ok(line)) = lines.next().await {
                    warn!(backend = %name, stderr = %line, "backend stderr");
                }
            })
        };

        Ok(Self {
            name: name.to_string(),
            writer: Mutex::new(FramedWrite::new(stdin, LinesCodec::new())),
            pending,
            tasks: vec![reader, stderr_task],
            _child: child,
        })
    }

    async fn send(&self, message: &JsonRpcRequest) -> anyhow::Result<()> {
        let line = serde_json::to_string(message)?;
        self.writer
            .lock()
            .await
            .send(line)
            .await
            .with_context(|| format!("failed to write to backend {}", self.name))
    }
}

impl Drop for StdioBackend {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.pending.close();
    }
}

#[async_trait]
impl RpcChannel for StdioBackend {
    async fn request(&self, method: &str, params: Params) -> anyhow::Result<Value> {
        let call = self.pending.register()?;
        self.send(&JsonRpcRequest::new(call.id(), method, params))
            .await?;
        rpc::into_result(call.wait().await?)
    }

    async fn notify(&self, method: &str, params: Params) -> anyhow::Result<()> {
        self.send(&JsonRpcRequest::notification(method, params)).await
    }
}

#[async_trait]
impl BackendClient for StdioBackend {
    async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        rpc::list_all_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<Value> {
        rpc::call_tool(self, name, arguments).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    /// A shell one-liner that plays a tiny MCP server: answers `initialize`
    /// (id 1), swallows the initialized notification, answers `tools/list`
    /// (id 2), then idles.
    fn fake_server() -> Vec<String> {
        let script = concat!(
            r#"read l; echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26","capabilities":{},"serverInfo":{"name":"fake","version":"1"}}}'; "#,
            r#"read l; read l; echo 'log line on stdout'; "#,
            r#"echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}}]}}'; "#,
            r#"echo 'warning from backend' >&2; sleep 5"#,
        );
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn handshake_and_list_over_stdio() {
        let backend =
            StdioBackend::spawn("fake", "sh", &fake_server(), &BTreeMap::new()).unwrap();

        let info = tokio::time::timeout(Duration::from_secs(5), rpc::handshake(&backend))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.unwrap().name, "fake");

        let tools = tokio::time::timeout(Duration::from_secs(5), backend.list_tools())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].input_schema, Some(json!({"type": "object"})));
    }

    #[tokio::test]
    async fn exited_process_fails_pending_requests() {
        let backend = StdioBackend::spawn("gone", "true", &[], &BTreeMap::new()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), backend.list_tools())
            .await
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_command_is_a_spawn_error() {
        let err = StdioBackend::spawn("missing", "/nonexistent/mcp-server", &[], &BTreeMap::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to start backend missing"));
    }
}
