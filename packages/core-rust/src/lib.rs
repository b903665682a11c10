//! `mcp-relay` Core — JSON-RPC envelope and MCP tool schemas shared by the
//! relay front-end and its backend clients.

pub mod messages;

pub use messages::jsonrpc::{
    error_codes, ErrorObject, JsonRpcRequest, JsonRpcResponse, Params, JSONRPC_VERSION,
};
pub use messages::tools::{
    Implementation, InitializeResult, ListToolsResult, Tool, LATEST_PROTOCOL_VERSION,
};
