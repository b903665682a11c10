//! Request classification: converts a raw JSON-RPC body into a typed
//! `Operation`, or into the error envelope the caller should receive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay_core::{JsonRpcRequest, Params, JSONRPC_VERSION};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::config::ServiceConfig;
use super::operation::{methods, ClassifyError, Operation, OperationContext, Target};
use super::registry::RegistrySnapshot;

// ---------------------------------------------------------------------------
// OperationClassifier
// ---------------------------------------------------------------------------

/// Decodes, validates and classifies request bodies.
///
/// Each successfully classified request gets a fresh call id and the
/// configured per-request timeout.
#[derive(Debug)]
pub struct OperationClassifier {
    call_id_counter: AtomicU64,
    call_timeout_ms: u64,
}

impl OperationClassifier {
    #[must_use]
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            call_id_counter: AtomicU64::new(1),
            call_timeout_ms: config.request_timeout_ms,
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Classify a request body addressed to `target`.
    ///
    /// # Errors
    ///
    /// - `ClassifyError::Parse` if the body is not a JSON object with
    ///   correctly typed members
    /// - `ClassifyError::InvalidRequest` for a wrong protocol version or an
    ///   empty method
    /// - `ClassifyError::MethodNotFound` for methods outside the fixed table
    /// - `ClassifyError::InvalidParams` for `tools/call` without a tool name
    pub fn classify(
        &self,
        body: &[u8],
        target: Target,
        snapshot: Arc<RegistrySnapshot>,
    ) -> Result<Operation, ClassifyError> {
        let request = decode(body)?;
        validate(&request)?;

        let JsonRpcRequest {
            method, params, id, ..
        } = request;

        let make_ctx = |id: Value| {
            OperationContext::new(
                self.next_call_id(),
                id,
                target,
                snapshot,
                self.call_timeout_ms,
            )
        };

        match method.as_str() {
            methods::INITIALIZE => Ok(Operation::Initialize { ctx: make_ctx(id) }),
            methods::INITIALIZED => Ok(Operation::Initialized { ctx: make_ctx(id) }),
            methods::TOOLS_LIST => Ok(Operation::ListTools { ctx: make_ctx(id) }),
            methods::TOOLS_CALL => {
                let Some(name) = params.str("name").filter(|n| !n.is_empty()) else {
                    return Err(ClassifyError::InvalidParams {
                        id,
                        reason: "tool name is required".to_string(),
                    });
                };
                let name = name.to_string();
                let arguments = call_arguments(&params, &name);
                Ok(Operation::CallTool {
                    ctx: make_ctx(id),
                    name,
                    arguments,
                })
            }
            _ => Err(ClassifyError::MethodNotFound { id, method }),
        }
    }
}

fn decode(body: &[u8]) -> Result<JsonRpcRequest, ClassifyError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| ClassifyError::Parse {
        reason: e.to_string(),
    })?;
    if !value.is_object() {
        return Err(ClassifyError::Parse {
            reason: "request must be a JSON object".to_string(),
        });
    }
    JsonRpcRequest::deserialize(value).map_err(|e| ClassifyError::Parse {
        reason: e.to_string(),
    })
}

fn validate(request: &JsonRpcRequest) -> Result<(), ClassifyError> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(ClassifyError::InvalidRequest {
            id: request.id.clone(),
            reason: format!("invalid jsonrpc version: {}", request.jsonrpc),
        });
    }
    if request.method.is_empty() {
        return Err(ClassifyError::InvalidRequest {
            id: request.id.clone(),
            reason: "method is required".to_string(),
        });
    }
    Ok(())
}

/// Missing or non-object `arguments` are treated as an empty argument set.
fn call_arguments(params: &Params, tool: &str) -> Map<String, Value> {
    match params.get("arguments") {
        Some(Value::Object(arguments)) => arguments.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(other) => {
            debug!(tool, kind = ?other, "tool arguments are not an object, using empty arguments");
            Map::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
