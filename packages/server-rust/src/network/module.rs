//! Network module with deferred startup lifecycle.
//!
//! `new()` creates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections. The split lets `main` kick off backend
//! initialization after the port is bound but before serving begins, so
//! probes answer "not ready" instead of refusing connections.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    flat_rpc_handler, health_handler, liveness_handler, readiness_handler, split_rpc_handler,
    AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::{
    build_operation_pipeline, AddressingMode, BackendRegistry, OperationClassifier,
    ServiceConfig, ToolCache, ToolService,
};

/// How long `serve` waits for in-flight requests after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles the axum router for `mode`.
///
/// Routes:
/// - `GET /health` -- detailed health JSON
/// - `GET /health/liveness`, `GET /health/live` -- liveness probe
/// - `GET /health/readiness`, `GET /health/ready` -- readiness probe
/// - flat: `POST /mcp`, `POST /api/mcp`
/// - split: `POST /` and `POST /{*path}`, first segment names the backend
///
/// In split mode the probe paths also accept `POST`, so a backend named
/// `health` stays reachable. Bodies over `max_body_bytes` get 413.
pub fn build_router(state: AppState, mode: AddressingMode, config: &NetworkConfig) -> Router {
    let router = Router::new()
        .route("/health", probe_route(mode, get(health_handler)))
        .route("/health/liveness", probe_route(mode, get(liveness_handler)))
        .route("/health/live", probe_route(mode, get(liveness_handler)))
        .route("/health/readiness", probe_route(mode, get(readiness_handler)))
        .route("/health/ready", probe_route(mode, get(readiness_handler)));

    let router = match mode {
        AddressingMode::Flat => router
            .route("/mcp", post(flat_rpc_handler))
            .route("/api/mcp", post(flat_rpc_handler)),
        AddressingMode::Split => router
            .route("/", post(split_rpc_handler))
            .route("/{*path}", post(split_rpc_handler)),
    };

    router
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(build_http_layers(config))
        .with_state(state)
}

fn probe_route(mode: AddressingMode, probe: MethodRouter<AppState>) -> MethodRouter<AppState> {
    match mode {
        AddressingMode::Flat => probe,
        AddressingMode::Split => probe.post(split_rpc_handler),
    }
}

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates the registry, dispatch pipeline and shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    mode: AddressingMode,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, service: &ServiceConfig, registry: Arc<BackendRegistry>) -> Self {
        let cache = Arc::new(ToolCache::new(Duration::from_millis(service.cache_ttl_ms)));
        let state = AppState {
            registry,
            classifier: Arc::new(OperationClassifier::new(service)),
            pipeline: build_operation_pipeline(ToolService::new(cache)),
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        };
        Self {
            config,
            mode: service.mode,
            listener: None,
            state,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    #[must_use]
    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.mode, &self.config)
    }

    /// Binds the TCP listener and returns the bound port, which differs from
    /// the configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, mode = ?self.mode, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests for
    /// up to 30 seconds.
    ///
    /// # Errors
    ///
    /// Fails if `start()` was not called, TLS material cannot be loaded, or
    /// the server hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.router();
        let controller = self.shutdown_controller();

        controller.set_ready();

        let drain = {
            let controller = Arc::clone(&controller);
            async move {
                shutdown.await;
                controller.trigger_shutdown();
            }
        };

        match &self.config.tls {
            Some(tls) => serve_tls(listener, router, tls, drain).await?,
            None => serve_plain(listener, router, drain).await?,
        }

        if controller.wait_for_drain(DRAIN_TIMEOUT).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        Ok(())
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves TLS through `axum-server` with rustls, reusing the bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .context("failed to load TLS certificate and key")?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
    });

    info!(%addr, "serving TLS");
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
