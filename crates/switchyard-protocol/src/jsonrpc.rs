//! JSON-RPC 2.0 Protocol Implementation
//!
//! Message envelopes for the broker's control socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard and broker-specific error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const ACCESS_DENIED: i32 = -32001;
    pub const INVALID_ARGUMENT: i32 = -32002;
    pub const GENERIC_ERROR: i32 = -32000;
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Request ID for correlating responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Method name (e.g., "instances.list")
    pub method: String,

    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::Number(1.into())),
            method: method.into(),
            params,
        }
    }

    /// Check if this is a notification (no id = no response expected)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jsonrpc != "2.0" {
            return Err("Invalid JSON-RPC version, expected '2.0'".to_string());
        }
        if self.method.is_empty() {
            return Err("Method cannot be empty".to_string());
        }
        Ok(())
    }

    /// Parse method into namespace and action
    /// e.g., "instances.list" -> ("instances", "list")
    pub fn parse_method(&self) -> (&str, &str) {
        if let Some((namespace, action)) = self.method.split_once('.') {
            (namespace, action)
        } else {
            (self.method.as_str(), "")
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Request ID (copied from request)
    pub id: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Create a parse error response (for malformed JSON)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(Value::Null, codes::PARSE_ERROR, message, None)
    }

    pub fn invalid_request(id: Value, message: impl Into<String>) -> Self {
        Self::error(id, codes::INVALID_REQUEST, message, None)
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::error(
            id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
            None,
        )
    }

    pub fn invalid_params(id: Value, message: impl Into<String>) -> Self {
        Self::error(id, codes::INVALID_PARAMS, message, None)
    }

    pub fn internal_error(id: Value, message: impl Into<String>) -> Self {
        Self::error(id, codes::INTERNAL_ERROR, message, None)
    }
}

/// JSON-RPC 2.0 Error Object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Batch request support - parse either single request or array of requests
pub fn parse_request(input: &str) -> Result<Vec<JsonRpcRequest>, JsonRpcResponse> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(JsonRpcResponse::parse_error("Empty request"));
    }

    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<JsonRpcRequest>>(trimmed) {
            Ok(requests) if requests.is_empty() => Err(JsonRpcResponse::invalid_request(
                Value::Null,
                "Empty batch request",
            )),
            Ok(requests) => Ok(requests),
            Err(e) => Err(JsonRpcResponse::parse_error(e.to_string())),
        }
    } else {
        match serde_json::from_str::<JsonRpcRequest>(trimmed) {
            Ok(request) => Ok(vec![request]),
            Err(e) => Err(JsonRpcResponse::parse_error(e.to_string())),
        }
    }
}
