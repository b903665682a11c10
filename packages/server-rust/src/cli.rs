//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogFormat;
use crate::network::{NetworkConfig, TlsConfig, DEFAULT_MAX_BODY_BYTES};
use crate::service::{AddressingMode, ServiceConfig};

/// mcp-relay - serve many MCP backends behind one HTTP endpoint
#[derive(Parser, Debug)]
#[command(name = "mcp-relay", version, about)]
pub struct Cli {
    /// Backend configuration file (JSON or YAML)
    #[arg(short, long, env = "MCP_RELAY_CONFIG")]
    pub config: PathBuf,

    /// Address to bind
    #[arg(long, env = "MCP_RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "MCP_RELAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Serve each backend at /<name> instead of merging them behind /mcp
    #[arg(long, env = "MCP_RELAY_SPLIT_MODE")]
    pub split_mode: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "MCP_RELAY_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Tool catalog cache lifetime in seconds
    #[arg(long, env = "MCP_RELAY_CACHE_TTL_SECS", default_value_t = 60)]
    pub cache_ttl_secs: u64,

    /// Time allowed for each backend's connect and initialize exchange, in seconds
    #[arg(long, env = "MCP_RELAY_HANDSHAKE_TIMEOUT_SECS", default_value_t = 30)]
    pub handshake_timeout_secs: u64,

    /// Allowed CORS origins (comma separated, `*` for any)
    #[arg(long, env = "MCP_RELAY_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MCP_RELAY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, env = "MCP_RELAY_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "MCP_RELAY_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Expose Prometheus metrics on this port
    #[arg(long, env = "MCP_RELAY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format
    #[arg(long, env = "MCP_RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Log filter directives, used when RUST_LOG is unset
    #[arg(long, env = "MCP_RELAY_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

impl Cli {
    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }

    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            mode: if self.split_mode {
                AddressingMode::Split
            } else {
                AddressingMode::Flat
            },
            request_timeout_ms: self.request_timeout_secs.saturating_mul(1000),
            cache_ttl_ms: self.cache_ttl_secs.saturating_mul(1000),
            handshake_timeout_ms: self.handshake_timeout_secs.saturating_mul(1000),
        }
    }
}
