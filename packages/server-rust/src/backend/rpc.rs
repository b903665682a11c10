//! MCP client protocol steps shared by every transport.
//!
//! A transport only needs to move one request or notification at a time
//! ([`RpcChannel`]); the handshake, catalog pagination and tool invocation
//! are written once here on top of it.

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use relay_core::{
    Implementation, JsonRpcResponse, ListToolsResult, Params, Tool, LATEST_PROTOCOL_VERSION,
};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Name the relay presents to backends in `clientInfo`.
pub const CLIENT_NAME: &str = "mcp-relay";

/// Upper bound on `tools/list` pages followed for one catalog fetch.
const MAX_TOOL_PAGES: usize = 1_000;

/// A single JSON-RPC conversation with a backend.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends a request and returns its `result`.
    async fn request(&self, method: &str, params: Params) -> anyhow::Result<Value>;

    /// Sends a notification; no response is expected.
    async fn notify(&self, method: &str, params: Params) -> anyhow::Result<()>;
}

#[must_use]
pub fn client_info() -> Implementation {
    Implementation {
        name: CLIENT_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Runs the MCP initialization exchange: `initialize`, then
/// `notifications/initialized`. Returns the backend's `serverInfo`, if any.
///
/// # Errors
///
/// Propagates transport failures and error responses.
pub async fn handshake(channel: &dyn RpcChannel) -> anyhow::Result<Option<Implementation>> {
    let params = named(json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": client_info(),
    }));
    let result = channel
        .request("initialize", params)
        .await
        .context("initialize request failed")?;

    let server_info = result
        .get("serverInfo")
        .and_then(|info| serde_json::from_value::<Implementation>(info.clone()).ok());
    let protocol_version = result.get("protocolVersion").and_then(|v| v.as_str());
    debug!(
        protocol_version,
        server = server_info.as_ref().map(|i| i.name.as_str()),
        "backend initialized"
    );

    channel
        .notify("notifications/initialized", Params::Absent)
        .await
        .context("initialized notification failed")?;
    Ok(server_info)
}

/// Fetches the full catalog, following `nextCursor` until it runs out.
///
/// # Errors
///
/// Propagates transport failures, error responses and malformed pages.
pub async fn list_all_tools(channel: &dyn RpcChannel) -> anyhow::Result<Vec<Tool>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = match &cursor {
            Some(cursor) => named(json!({ "cursor": cursor })),
            None => Params::Absent,
        };
        let result = channel.request("tools/list", params).await?;
        let page: ListToolsResult =
            serde_json::from_value(result).context("malformed tools/list result")?;
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }
    Err(anyhow!(
        "tools/list did not finish after {MAX_TOOL_PAGES} pages"
    ))
}

/// Invokes `tools/call` and returns the raw result payload.
///
/// # Errors
///
/// Propagates transport failures and error responses.
pub async fn call_tool(
    channel: &dyn RpcChannel,
    name: &str,
    arguments: Map<String, Value>,
) -> anyhow::Result<Value> {
    let params = named(json!({ "name": name, "arguments": arguments }));
    channel.request("tools/call", params).await
}

/// Converts a backend response into its result, or an error carrying the
/// backend's code and message.
///
/// # Errors
///
/// Returns the backend's error object as an `anyhow::Error`.
pub fn into_result(response: JsonRpcResponse) -> anyhow::Result<Value> {
    response.into_result().map_err(anyhow::Error::from)
}

/// Parses one inbound message and keeps it only if it is a response.
///
/// Requests and notifications initiated by the backend, and text that is not
/// JSON at all (log output on stdout), are dropped with a debug log.
#[must_use]
pub fn parse_response(text: &str) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "ignoring non-JSON backend output");
            return None;
        }
    };
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        debug!(method, "ignoring backend-initiated message");
        return None;
    }
    if value.get("result").is_none() && value.get("error").is_none() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn named(value: Value) -> Params {
    match value {
        Value::Object(map) => Params::Named(map),
        _ => Params::Absent,
    }
}
