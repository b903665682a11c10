//! `mcp-relay` binary entry point.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_server::backend::spawn_initialization;
use relay_server::cli::Cli;
use relay_server::logging::init_tracing;
use relay_server::{load_config, BackendRegistry, NetworkModule};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter, cli.log_format)?;

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    info!(
        path = %cli.config.display(),
        backends = config.mcp_servers.len(),
        "loaded backend configuration"
    );

    if let Some(port) = cli.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let service = cli.service_config();
    let (registry, installer) = BackendRegistry::new();
    let mut network = NetworkModule::new(cli.network_config(), &service, registry);
    network.start().await?;

    let init = spawn_initialization(
        installer,
        config,
        Duration::from_millis(service.handshake_timeout_ms),
    );

    network.serve(shutdown_signal()).await?;
    init.abort();
    info!("relay stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}
