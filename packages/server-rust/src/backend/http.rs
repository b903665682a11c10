//! Streamable HTTP backend: every message is its own POST.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use relay_core::{JsonRpcRequest, JsonRpcResponse, Params, Tool};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::debug;

use super::event_stream::EventStreamDecoder;
use super::rpc::{self, RpcChannel};
use crate::traits::BackendClient;

/// Session header assigned by the backend on `initialize`.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

pub struct StreamableHttpBackend {
    name: String,
    url: Url,
    http: reqwest::Client,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl StreamableHttpBackend {
    /// # Errors
    ///
    /// Fails if `url` does not parse.
    pub fn new(name: &str, url: &str, http: reqwest::Client) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("backend {name}: invalid url {url}"))?;
        Ok(Self {
            name: name.to_string(),
            url,
            http,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    async fn post(&self, message: &JsonRpcRequest) -> anyhow::Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.url.clone())
            .header(ACCEPT, ACCEPT_BOTH)
            .json(message);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to backend {} failed", self.name))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("backend {} returned HTTP {status}: {body}", self.name);
        }
        Ok(response)
    }
}

/// Reads the first response whose id matches `id` out of an event-stream body.
async fn response_from_stream(
    response: reqwest::Response,
    id: u64,
) -> anyhow::Result<JsonRpcResponse> {
    let mut body = response.bytes_stream();
    let mut decoder = EventStreamDecoder::new();
    let expected = Value::from(id);

    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("event stream interrupted")?;
        for event in decoder.push(&chunk) {
            if event.event != "message" {
                continue;
            }
            if let Some(resp) = rpc::parse_response(&event.data) {
                if resp.id == expected {
                    return Ok(resp);
                }
            }
        }
    }
    if let Some(event) = decoder.finish() {
        if let Some(resp) = rpc::parse_response(&event.data) {
            if resp.id == expected {
                return Ok(resp);
            }
        }
    }
    Err(anyhow!("event stream ended without a response to request {id}"))
}

#[async_trait]
impl RpcChannel for StreamableHttpBackend {
    async fn request(&self, method: &str, params: Params) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let message = if is_stream {
            response_from_stream(response, id).await?
        } else {
            response
                .json::<JsonRpcResponse>()
                .await
                .with_context(|| format!("backend {} sent a malformed response", self.name))?
        };
        rpc::into_result(message)
    }

    async fn notify(&self, method: &str, params: Params) -> anyhow::Result<()> {
        let response = self
            .post(&JsonRpcRequest::notification(method, params))
            .await?;
        debug!(backend = %self.name, method, status = %response.status(), "notification accepted");
        Ok(())
    }
}

#[async_trait]
impl BackendClient for StreamableHttpBackend {
    async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        rpc::list_all_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<Value> {
        rpc::call_tool(self, name, arguments).await
    }
}
