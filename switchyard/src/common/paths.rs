//! Path Utilities
//!
//! Common path resolution for switchyard directories and files.

use std::path::PathBuf;

use super::error::{AppError, ErrorCode};

/// Get the switchyard base directory (`~/.switchyard/`)
pub fn switchyard_dir() -> Result<PathBuf, AppError> {
    let home = dirs::home_dir().ok_or_else(|| {
        AppError::new(ErrorCode::InternalError, "Could not determine home directory")
    })?;
    Ok(home.join(".switchyard"))
}

/// Get a path within the switchyard directory
///
/// # Example
/// ```ignore
/// let manifests = switchyard_path("manifests")?;
/// ```
pub fn switchyard_path(relative_path: &str) -> Result<PathBuf, AppError> {
    Ok(switchyard_dir()?.join(relative_path))
}

/// Get the control socket path
pub fn socket_path() -> Result<PathBuf, AppError> {
    switchyard_protocol::default_socket_path().ok_or_else(|| {
        AppError::new(ErrorCode::InternalError, "Could not determine home directory")
    })
}

/// Get the manifest directory
pub fn manifest_dir() -> Result<PathBuf, AppError> {
    switchyard_path("manifests")
}

/// Get the broker configuration file
pub fn config_path() -> Result<PathBuf, AppError> {
    switchyard_path("config.json")
}
