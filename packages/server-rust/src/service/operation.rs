//! Typed operations flowing through the dispatch pipeline, and their
//! success and error outcomes.

use std::fmt;
use std::sync::Arc;

use relay_core::{
    error_codes, ErrorObject, InitializeResult, JsonRpcResponse, ListToolsResult,
};
use serde_json::{Map, Value};

use super::registry::RegistrySnapshot;

/// Method names the relay answers. Matching is exact and case-sensitive.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Which backends an operation runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Split mode: the single backend named by the request path.
    Backend(String),
    /// Flat mode: the merged view of every installed backend.
    Aggregate,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(name) => f.write_str(name),
            Self::Aggregate => f.write_str("*"),
        }
    }
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Relay-assigned id, unique per process, used for log correlation.
    pub call_id: u64,
    /// The caller's JSON-RPC id, echoed in the response.
    pub request_id: Value,
    pub target: Target,
    /// Registry snapshot taken when the request was accepted.
    pub snapshot: Arc<RegistrySnapshot>,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(
        call_id: u64,
        request_id: Value,
        target: Target,
        snapshot: Arc<RegistrySnapshot>,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            request_id,
            target,
            snapshot,
            call_timeout_ms,
        }
    }
}

#[derive(Debug)]
pub enum Operation {
    Initialize {
        ctx: OperationContext,
    },
    Initialized {
        ctx: OperationContext,
    },
    ListTools {
        ctx: OperationContext,
    },
    CallTool {
        ctx: OperationContext,
        name: String,
        arguments: Map<String, Value>,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::Initialize { ctx }
            | Self::Initialized { ctx }
            | Self::ListTools { ctx }
            | Self::CallTool { ctx, .. } => ctx,
        }
    }

    /// The JSON-RPC method this operation was classified from.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => methods::INITIALIZE,
            Self::Initialized { .. } => methods::INITIALIZED,
            Self::ListTools { .. } => methods::TOOLS_LIST,
            Self::CallTool { .. } => methods::TOOLS_CALL,
        }
    }
}

/// Successful outcome of an operation.
#[derive(Debug)]
pub enum OperationResponse {
    Initialized(InitializeResult),
    /// Empty acknowledgement (`{}`).
    Ack,
    Tools(ListToolsResult),
    /// A backend's `tools/call` result, passed through untouched.
    ToolResult(Value),
}

impl OperationResponse {
    /// The JSON-RPC `result` member for this response.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Initialized(result) => serde_json::to_value(result).unwrap_or(Value::Null),
            Self::Ack => Value::Object(Map::new()),
            Self::Tools(result) => serde_json::to_value(result).unwrap_or(Value::Null),
            Self::ToolResult(value) => value,
        }
    }
}

/// Errors returned by operation handlers. All of them are reported to the
/// caller inside a JSON-RPC error envelope.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("backend {name} not found")]
    UnknownBackend { name: String },
    #[error("tool {name} not found")]
    ToolNotFound { name: String },
    #[error("tool {name} is not allowed on backend {backend}")]
    ToolDenied { backend: String, name: String },
    #[error("request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("backend {backend}: {source:#}")]
    Backend {
        backend: String,
        source: anyhow::Error,
    },
}

impl OperationError {
    /// JSON-RPC error code for this failure.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::ToolNotFound { .. } => error_codes::TOOL_NOT_FOUND,
            Self::ToolDenied { .. } => error_codes::TOOL_ACCESS_DENIED,
            Self::UnknownBackend { .. } | Self::Timeout { .. } | Self::Backend { .. } => {
                error_codes::INTERNAL_ERROR
            }
        }
    }

    /// Internal failures carry a fixed message with the cause in `data`;
    /// client-attributable ones put the cause in the message itself.
    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        match self.code() {
            error_codes::INTERNAL_ERROR => {
                ErrorObject::new(error_codes::INTERNAL_ERROR, "Internal error")
                    .with_data(self.to_string())
            }
            code => ErrorObject::new(code, self.to_string()),
        }
    }
}

/// Reasons a request body cannot become an [`Operation`].
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The body is not a decodable JSON-RPC object; no id is known.
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("{reason}")]
    InvalidRequest { id: Value, reason: String },
    #[error("method not found: {method}")]
    MethodNotFound { id: Value, method: String },
    #[error("{reason}")]
    InvalidParams { id: Value, reason: String },
}

impl ClassifyError {
    /// The JSON-RPC error envelope sent back for this failure.
    #[must_use]
    pub fn into_response(self) -> JsonRpcResponse {
        match self {
            Self::Parse { .. } => JsonRpcResponse::failure(
                Value::Null,
                ErrorObject::new(error_codes::PARSE_ERROR, "Parse error"),
            ),
            Self::InvalidRequest { id, reason } => JsonRpcResponse::failure(
                id,
                ErrorObject::new(error_codes::INVALID_REQUEST, reason),
            ),
            Self::MethodNotFound { id, method } => JsonRpcResponse::failure(
                id,
                ErrorObject::new(error_codes::METHOD_NOT_FOUND, "Method not found")
                    .with_data(method),
            ),
            Self::InvalidParams { id, reason } => JsonRpcResponse::failure(
                id,
                ErrorObject::new(error_codes::INVALID_PARAMS, reason),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = OperationError::ToolNotFound {
            name: "z".to_string(),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, error_codes::TOOL_NOT_FOUND);
        assert_eq!(obj.message, "tool z not found");
        assert!(obj.data.is_none());

        let denied = OperationError::ToolDenied {
            backend: "files".to_string(),
            name: "rm".to_string(),
        };
        assert_eq!(denied.code(), error_codes::TOOL_ACCESS_DENIED);
    }

    #[test]
    fn backend_failures_are_internal_errors_with_cause() {
        let err = OperationError::Backend {
            backend: "a".to_string(),
            source: anyhow!("connection reset").context("tools/call failed"),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, error_codes::INTERNAL_ERROR);
        assert_eq!(obj.message, "Internal error");
        assert_eq!(
            obj.data,
            Some(json!("backend a: tools/call failed: connection reset"))
        );
    }

    #[test]
    fn timeout_is_an_internal_error() {
        let obj = OperationError::Timeout { timeout_ms: 50 }.to_error_object();
        assert_eq!(obj.code, error_codes::INTERNAL_ERROR);
        assert_eq!(obj.data, Some(json!("request timeout after 50ms")));
    }

    #[test]
    fn parse_error_response_has_null_id() {
        let resp = ClassifyError::Parse {
            reason: "EOF".to_string(),
        }
        .into_response();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[test]
    fn method_not_found_echoes_id_and_method() {
        let resp = ClassifyError::MethodNotFound {
            id: json!(4),
            method: "prompts/list".to_string(),
        }
        .into_response();
        assert_eq!(resp.id, json!(4));
        let error = resp.error.unwrap();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(error.data, Some(json!("prompts/list")));
    }

    #[test]
    fn ack_is_an_empty_object() {
        assert_eq!(OperationResponse::Ack.into_value(), json!({}));
    }
}
