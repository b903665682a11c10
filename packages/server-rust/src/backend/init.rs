//! Startup connection pass: turns the configured `mcpServers` into a
//! registry snapshot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use super::http::StreamableHttpBackend;
use super::rpc::{self, RpcChannel};
use super::sse::SseBackend;
use super::stdio::StdioBackend;
use super::BackendHandle;
use crate::config::{env_checksums, BackendConfig, RelayConfig};
use crate::service::registry::{RegistryInstaller, RegistrySnapshot};
use crate::traits::BackendClient;

/// Connects one backend and completes the MCP handshake within
/// `handshake_timeout`.
///
/// The transport is chosen from the entry: `command` starts a stdio child,
/// `url` with `_extensions.sse` opens a legacy SSE stream, any other `url`
/// uses streamable HTTP.
///
/// # Errors
///
/// Fails if the entry names no transport, the connection cannot be made, or
/// the handshake errors or times out.
pub async fn connect_backend(
    name: &str,
    config: &BackendConfig,
    http: &reqwest::Client,
    handshake_timeout: Duration,
) -> anyhow::Result<BackendHandle> {
    for (key, checksum) in env_checksums(&config.env) {
        debug!(backend = name, key, checksum = %checksum, "backend environment");
    }

    let policy = config.extensions.tools.clone();
    let client: Arc<dyn BackendClient> = match (&config.command, &config.url) {
        (Some(command), _) => {
            let backend = StdioBackend::spawn(name, command, &config.args, &config.env)?;
            initialize(name, &backend, handshake_timeout).await?;
            Arc::new(backend)
        }
        (None, Some(url)) if config.extensions.sse => {
            let backend = tokio::time::timeout(
                handshake_timeout,
                SseBackend::connect(name, url, http.clone(), handshake_timeout),
            )
            .await
            .with_context(|| format!("backend {name}: timed out opening event stream"))??;
            initialize(name, &backend, handshake_timeout).await?;
            Arc::new(backend)
        }
        (None, Some(url)) => {
            let backend = StreamableHttpBackend::new(name, url, http.clone())?;
            initialize(name, &backend, handshake_timeout).await?;
            Arc::new(backend)
        }
        (None, None) => bail!("backend {name}: neither command nor url is configured"),
    };

    Ok(BackendHandle::new(name, client, policy))
}

async fn initialize(
    name: &str,
    channel: &dyn RpcChannel,
    handshake_timeout: Duration,
) -> anyhow::Result<()> {
    let server = tokio::time::timeout(handshake_timeout, rpc::handshake(channel))
        .await
        .with_context(|| {
            format!(
                "backend {name}: initialize timed out after {}s",
                handshake_timeout.as_secs()
            )
        })??;
    match server {
        Some(info) => info!(
            backend = name,
            server = %info.name,
            version = %info.version,
            "backend initialized"
        ),
        None => info!(backend = name, "backend initialized"),
    }
    Ok(())
}

/// Connects every enabled backend concurrently.
///
/// Backends that fail are logged and left out; disabled ones are skipped.
///
/// # Errors
///
/// Only if the shared HTTP client cannot be built.
pub async fn build_snapshot(
    config: &RelayConfig,
    handshake_timeout: Duration,
) -> anyhow::Result<RegistrySnapshot> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("mcp-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    Ok(build_snapshot_with(config, move |name, entry| {
        let http = http.clone();
        async move { connect_backend(&name, &entry, &http, handshake_timeout).await }
    })
    .await)
}

/// [`build_snapshot`] with an explicit connector.
pub async fn build_snapshot_with<F, Fut>(config: &RelayConfig, connect: F) -> RegistrySnapshot
where
    F: Fn(String, BackendConfig) -> Fut,
    Fut: Future<Output = anyhow::Result<BackendHandle>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (name, entry) in &config.mcp_servers {
        if entry.extensions.disabled {
            info!(backend = %name, "backend disabled, skipping");
            continue;
        }
        let backend = name.clone();
        let fut = connect(name.clone(), entry.clone());
        tasks.spawn(async move { (backend, fut.await) });
    }

    let mut handles = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(handle))) => handles.push(handle),
            Ok((backend, Err(e))) => {
                error!(backend = %backend, error = %format!("{e:#}"), "failed to initialize backend");
            }
            Err(e) => error!(error = %e, "backend initialization task failed"),
        }
    }

    let snapshot = RegistrySnapshot::from_handles(handles);
    info!(
        backends = snapshot.len(),
        configured = config.mcp_servers.len(),
        "backend initialization complete"
    );
    snapshot
}

/// Runs [`build_snapshot`] on a background task and installs the result.
pub fn spawn_initialization(
    installer: RegistryInstaller,
    config: RelayConfig,
    handshake_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match build_snapshot(&config, handshake_timeout).await {
            Ok(snapshot) => installer.install(snapshot),
            Err(e) => error!(error = %format!("{e:#}"), "backend initialization aborted"),
        }
    })
}
