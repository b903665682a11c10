//! JSON-RPC 2.0 envelope types.
//!
//! `params` is modelled as an explicit tagged value ([`Params`]) rather than a
//! loosely typed bag, so callers ask for a field and get either the typed
//! value or `None` instead of failing the whole request on an unexpected
//! shape.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// The only protocol version literal accepted in the `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known JSON-RPC and relay error codes.
pub mod error_codes {
    /// Invalid JSON was received; the request id could not be recovered.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error, including every backend failure and timeout.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// No reachable backend offers the requested tool.
    pub const TOOL_NOT_FOUND: i32 = -32001;
    /// The backend's allow/deny policy excludes the requested tool.
    pub const TOOL_ACCESS_DENIED: i32 = -32002;
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// The `params` member of a request.
///
/// A missing or `null` member decodes to [`Params::Absent`], which behaves
/// like an empty object for every accessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No `params` member, or an explicit `null`.
    #[default]
    Absent,
    /// By-name parameters (a JSON object).
    Named(Map<String, Value>),
    /// By-position parameters (a JSON array).
    Positional(Vec<Value>),
}

impl Params {
    /// Returns `true` when the request carried no parameters.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Looks up a named parameter. Positional and absent params have no names.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Named(map) => map.get(key),
            Self::Absent | Self::Positional(_) => None,
        }
    }

    /// Looks up a named parameter that must be a string.
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Looks up a named parameter that must be an object.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self::Named(map)
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_none(),
            Self::Named(map) => map.serialize(serializer),
            Self::Positional(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self::Absent),
            Value::Object(map) => Ok(Self::Named(map)),
            Value::Array(items) => Ok(Self::Positional(items)),
            other => Err(D::Error::custom(format!(
                "params must be an object or an array, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A JSON-RPC request or notification.
///
/// Every member defaults when missing so that a well-formed JSON object with
/// a bad version or no method is reported as an invalid request (with its id)
/// rather than as a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Params::is_absent")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
}

impl JsonRpcRequest {
    /// Builds a request that expects a response.
    pub fn new(id: impl Into<Value>, method: &str, params: Params) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: id.into(),
        }
    }

    /// Builds a notification (no id, no response expected).
    #[must_use]
    pub fn notification(method: &str, params: Params) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Error member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, ": {data}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorObject {}

/// A JSON-RPC response, success or failure.
///
/// `id` is always serialized; it is `null` when the request id could not be
/// determined (parse errors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    #[serde(default)]
    pub id: Value,
}

/// Maps a present `result` member to `Some` even when it is `null`.
fn deserialize_present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn failure(id: Value, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Splits the response into its result or its error.
    ///
    /// # Errors
    ///
    /// Returns the response's error object, or an internal error when the
    /// response carries neither member.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(ErrorObject::new(
                error_codes::INTERNAL_ERROR,
                "response missing both result and error",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
