//! Control Socket
//!
//! Lets local tools inspect and drive a running broker.
//!
//! Protocol: JSON-RPC 2.0 over a Unix socket at `~/.switchyard/switchyard.sock`

pub mod handlers;
mod server;

use tokio::sync::RwLock;

pub use handlers::HandlerRegistry;
pub use server::ControlServer;

/// Connection counters shared across connections
#[derive(Default)]
pub struct ServerState {
    /// Connections accepted since start
    pub connection_count: RwLock<u64>,
    /// Connections currently open
    pub active_connections: RwLock<u32>,
}

/// Error types for the control socket
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Socket path {0:?} is in use by a running broker")]
    InUse(std::path::PathBuf),
}
