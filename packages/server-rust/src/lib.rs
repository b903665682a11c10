//! `mcp-relay` server: serves many MCP backends behind one HTTP endpoint,
//! either merged (flat mode) or one path per backend (split mode).

pub mod backend;
pub mod cli;
pub mod config;
pub mod logging;
pub mod network;
pub mod service;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use backend::BackendHandle;
pub use config::{load_config, RelayConfig};
pub use network::NetworkModule;
pub use service::{BackendRegistry, ServiceConfig};
pub use traits::BackendClient;
