//! Out-of-Process Runner
//!
//! Spawns a service executable as a child process. The control channel
//! request is held for the lifetime of the child, so the broker observes the
//! child's exit as loss of the control channel.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use switchyard_protocol::Identity;

use super::{CompletedCallback, NativeRunner, NativeRunnerFactory, PidAvailableCallback, RunnerError};
use crate::interfaces::ShellClientRequest;

/// Launch settings shared by every runner a factory creates
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Extra environment for launched services.
    pub env: HashMap<String, String>,
    /// Kill the child when its runner is dropped.
    pub kill_on_shutdown: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            kill_on_shutdown: true,
        }
    }
}

pub struct OutOfProcessNativeRunner {
    options: RunnerOptions,
    task: Option<JoinHandle<()>>,
}

impl OutOfProcessNativeRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            options,
            task: None,
        }
    }
}

impl NativeRunner for OutOfProcessNativeRunner {
    fn start(
        &mut self,
        path: &Path,
        identity: &Identity,
        start_sandboxed: bool,
        request: ShellClientRequest,
        pid_available: PidAvailableCallback,
        completed: CompletedCallback,
    ) {
        if start_sandboxed {
            warn!(
                "Sandboxed launch requested for {} but no sandbox is available, starting unsandboxed",
                identity.name()
            );
        }

        let command = build_command(path, identity, &self.options);
        let name = identity.name().to_string();
        let path_display = path.display().to_string();

        self.task = Some(tokio::spawn(async move {
            let mut child = match spawn(command, &path_display) {
                Ok(child) => child,
                Err(e) => {
                    error!("Failed to launch {}: {}", name, e);
                    drop(request);
                    completed();
                    return;
                }
            };

            match child.id() {
                Some(pid) => {
                    info!("Launched {} as pid {}", name, pid);
                    pid_available(pid);
                }
                None => warn!("{}", RunnerError::NoPid(name.clone())),
            }

            match child.wait().await {
                Ok(status) => info!("{} exited: {}", name, status),
                Err(e) => error!("Failed to wait for {}: {}", name, e),
            }

            // Releasing the request is what tells the broker the service is gone.
            drop(request);
            completed();
        }));
    }
}

impl Drop for OutOfProcessNativeRunner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if self.options.kill_on_shutdown && !task.is_finished() {
                debug!("Aborting runner task");
                task.abort();
            }
        }
    }
}

fn build_command(path: &Path, identity: &Identity, options: &RunnerOptions) -> Command {
    let mut command = Command::new(path);
    command
        .arg("--switchyard-name")
        .arg(identity.name())
        .arg("--switchyard-user")
        .arg(identity.user_id())
        .arg("--switchyard-instance")
        .arg(identity.instance())
        .envs(&options.env)
        .stdin(Stdio::null())
        .kill_on_drop(options.kill_on_shutdown);
    command
}

fn spawn(mut command: Command, path: &str) -> Result<Child, RunnerError> {
    command.spawn().map_err(|source| RunnerError::SpawnFailed {
        path: path.to_string(),
        source,
    })
}

/// Creates an `OutOfProcessNativeRunner` per launch
#[derive(Debug, Clone, Default)]
pub struct OutOfProcessNativeRunnerFactory {
    options: RunnerOptions,
}

impl OutOfProcessNativeRunnerFactory {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }
}

impl NativeRunnerFactory for OutOfProcessNativeRunnerFactory {
    fn create(&self, _path: &Path) -> Box<dyn NativeRunner> {
        Box::new(OutOfProcessNativeRunner::new(self.options.clone()))
    }
}
