//! Legacy HTTP+SSE backend.
//!
//! A long-lived GET stream carries every server-to-client message. Its first
//! `endpoint` event names the URL that client messages are POSTed to;
//! responses come back on the stream as `message` events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use futures_util::StreamExt;
use relay_core::{JsonRpcRequest, Params, Tool};
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::event_stream::{EventStreamDecoder, SseEvent};
use super::pending::PendingRequests;
use super::rpc::{self, RpcChannel};
use crate::traits::BackendClient;

pub struct SseBackend {
    name: String,
    http: reqwest::Client,
    endpoint: Url,
    pending: Arc<PendingRequests>,
    reader: JoinHandle<()>,
}

impl SseBackend {
    /// Opens the event stream and waits up to `endpoint_timeout` for the
    /// `endpoint` event.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be opened, ends early, or announces no
    /// endpoint in time.
    pub async fn connect(
        name: &str,
        url: &str,
        http: reqwest::Client,
        endpoint_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let stream_url =
            Url::parse(url).with_context(|| format!("backend {name}: invalid url {url}"))?;
        let response = http
            .get(stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .with_context(|| format!("failed to open event stream for backend {name}"))?
            .error_for_status()?;

        let pending = PendingRequests::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(
            name.to_string(),
            stream_url,
            response,
            Arc::clone(&pending),
            endpoint_tx,
        ));

        let endpoint = match tokio::time::timeout(endpoint_timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                bail!("event stream for backend {name} closed before announcing an endpoint");
            }
            Err(_) => {
                reader.abort();
                bail!("backend {name} sent no endpoint event within {endpoint_timeout:?}");
            }
        };
        debug!(backend = %name, endpoint = %endpoint, "sse endpoint announced");

        Ok(Self {
            name: name.to_string(),
            http,
            endpoint,
            pending,
            reader,
        })
    }

    async fn post(&self, message: &JsonRpcRequest) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .with_context(|| format!("request to backend {} failed", self.name))?;
        let status = response.status();
        if !status.is_success() {
            bail!("backend {} returned HTTP {status}", self.name);
        }
        Ok(())
    }
}

impl Drop for SseBackend {
    fn drop(&mut self) {
        self.reader.abort();
        self.pending.close();
    }
}

async fn read_events(
    name: String,
    stream_url: Url,
    response: reqwest::Response,
    pending: Arc<PendingRequests>,
    endpoint_tx: oneshot::Sender<Url>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut body = response.bytes_stream();
    let mut decoder = EventStreamDecoder::new();

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    handle_event(&name, &stream_url, event, &pending, &mut endpoint_tx);
                }
            }
            Err(e) => {
                warn!(backend = %name, error = %e, "event stream interrupted");
                break;
            }
        }
    }
    debug!(backend = %name, "event stream closed");
    pending.close();
}

fn handle_event(
    name: &str,
    stream_url: &Url,
    event: SseEvent,
    pending: &PendingRequests,
    endpoint_tx: &mut Option<oneshot::Sender<Url>>,
) {
    match event.event.as_str() {
        "endpoint" => match stream_url.join(event.data.trim()) {
            Ok(endpoint) => {
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(endpoint);
                }
            }
            Err(e) => warn!(backend = %name, error = %e, data = %event.data, "invalid endpoint event"),
        },
        "message" => {
            if let Some(response) = rpc::parse_response(&event.data) {
                pending.complete(response);
            }
        }
        other => debug!(backend = %name, event = other, "ignoring event"),
    }
}

#[async_trait]
impl RpcChannel for SseBackend {
    async fn request(&self, method: &str, params: Params) -> anyhow::Result<Value> {
        let call = self.pending.register()?;
        self.post(&JsonRpcRequest::new(call.id(), method, params))
            .await?;
        let response = call
            .wait()
            .await
            .map_err(|e| anyhow!("backend {}: {e}", self.name))?;
        rpc::into_result(response)
    }

    async fn notify(&self, method: &str, params: Params) -> anyhow::Result<()> {
        self.post(&JsonRpcRequest::notification(method, params)).await
    }
}

#[async_trait]
impl BackendClient for SseBackend {
    async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        rpc::list_all_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<Value> {
        rpc::call_tool(self, name, arguments).await
    }
}
