/// How request paths map to backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressingMode {
    /// All backends merged behind `/mcp` and `/api/mcp`.
    #[default]
    Flat,
    /// Each backend reached at `/<backend-name>`.
    Split,
}

/// Dispatch engine configuration.
///
/// Controls addressing, the per-request timeout and catalog cache lifetime.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub mode: AddressingMode,
    /// Per-request timeout in milliseconds, covering every backend call the
    /// request makes.
    pub request_timeout_ms: u64,
    /// Tool catalog cache TTL in milliseconds.
    pub cache_ttl_ms: u64,
    /// Time allowed for each backend's connect and `initialize` exchange.
    pub handshake_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: AddressingMode::Flat,
            request_timeout_ms: 60_000,
            cache_ttl_ms: 60_000,
            handshake_timeout_ms: 30_000,
        }
    }
}
