//! Common Error Types
//!
//! Unified error handling with JSON-RPC error code mapping.

use std::fmt;

use switchyard_protocol::jsonrpc::codes;
use switchyard_protocol::ConnectResult;

/// JSON-RPC error codes
///
/// Standard codes: -32768 to -32000
/// Custom codes: -32099 to -32000
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors
    ParseError = codes::PARSE_ERROR as isize,
    InvalidRequest = codes::INVALID_REQUEST as isize,
    MethodNotFound = codes::METHOD_NOT_FOUND as isize,
    InvalidParams = codes::INVALID_PARAMS as isize,
    InternalError = codes::INTERNAL_ERROR as isize,

    // Connect policy results
    AccessDenied = codes::ACCESS_DENIED as isize,
    InvalidArgument = codes::INVALID_ARGUMENT as isize,

    // Broker control loop has stopped
    ShellUnavailable = -32003,

    // Generic application error
    GenericError = codes::GENERIC_ERROR as isize,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Broker error type with JSON-RPC code
#[derive(Debug)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {}", method))
    }

    /// The broker's control loop is gone
    pub fn shell_unavailable() -> Self {
        Self::new(ErrorCode::ShellUnavailable, "Shell is not running")
    }

    /// Map a rejected connect to its error code
    pub fn connect_rejected(result: ConnectResult, target: &str) -> Self {
        let code = match result {
            ConnectResult::AccessDenied => ErrorCode::AccessDenied,
            ConnectResult::InvalidArgument => ErrorCode::InvalidArgument,
            ConnectResult::Succeeded => ErrorCode::GenericError,
        };
        Self::new(code, format!("Connect to {} failed: {}", target, result.as_str()))
    }

    /// Convert to (code, message) tuple
    pub fn to_tuple(&self) -> (i32, String) {
        (self.code.code(), self.message.clone())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        Self::new(ErrorCode::GenericError, message)
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        Self::new(ErrorCode::GenericError, message)
    }
}
