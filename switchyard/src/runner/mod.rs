//! Native Runners
//!
//! Launch mechanisms for services that no in-process loader claims.

mod out_of_process;

use std::path::Path;

use switchyard_protocol::Identity;

use crate::interfaces::ShellClientRequest;

pub use out_of_process::{OutOfProcessNativeRunner, OutOfProcessNativeRunnerFactory, RunnerOptions};

/// Fires at most once with the launched process id.
pub type PidAvailableCallback = Box<dyn FnOnce(u32) + Send>;

/// Fires exactly once when the launched service has finished.
pub type CompletedCallback = Box<dyn FnOnce() + Send>;

/// Starts one service out of process
pub trait NativeRunner: Send {
    /// Start the executable at `path` for `identity`, serving `request`.
    /// Must not call either callback synchronously.
    fn start(
        &mut self,
        path: &Path,
        identity: &Identity,
        start_sandboxed: bool,
        request: ShellClientRequest,
        pid_available: PidAvailableCallback,
        completed: CompletedCallback,
    );
}

/// Vends a runner per launch
pub trait NativeRunnerFactory: Send {
    fn create(&self, path: &Path) -> Box<dyn NativeRunner>;
}

/// Error types for process launch
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to spawn {path}: {source}")]
    SpawnFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process for {0} exited before reporting a pid")]
    NoPid(String),
}
