//! Common Utilities
//!
//! Shared types, error handling, and path resolution used across the broker.

pub mod error;
pub mod paths;
pub mod result;

pub use error::{AppError, ErrorCode};
pub use paths::{config_path, manifest_dir, socket_path, switchyard_dir, switchyard_path};
pub use result::AppResult;
