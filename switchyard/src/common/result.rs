//! Common Result Type
//!
//! Type alias for broker-facing results.

use super::error::AppError;

/// Broker result type
///
/// Uses AppError so control-socket handlers can map failures to JSON-RPC codes.
pub type AppResult<T> = Result<T, AppError>;
