//! Control loop events.
//!
//! Everything that mutates broker state arrives here: calls from handles,
//! resolver and runner completions, and traffic from the channels the
//! instances serve.

use tokio::sync::oneshot;

use switchyard_protocol::Identity;

use super::Shell;
use crate::connect_params::ConnectParams;
use crate::interfaces::{
    ConnectorMessage, ConnectorRequest, InstanceListenerPtr, ShellClientPtr, ShellMessage,
    ShellRequest,
};
use crate::loader::Loader;
use crate::resolver::ResolvedName;

/// Observer for destroyed instances
pub type InstanceQuitCallback = Box<dyn FnMut(&Identity) + Send>;

pub(crate) type Inspector = Box<dyn FnOnce(&Shell) + Send>;

pub(crate) enum ShellEvent {
    // Handle calls
    Connect {
        params: ConnectParams,
        client: Option<ShellClientPtr>,
    },
    SetLoaderForName {
        name: String,
        loader: Box<dyn Loader>,
    },
    SetDefaultLoader(Box<dyn Loader>),
    SetInstanceQuitCallback(InstanceQuitCallback),
    AddInstanceListener(InstanceListenerPtr),
    Inspect(Inspector),
    Shutdown(oneshot::Sender<()>),

    // Asynchronous completions
    Resolved {
        token: u64,
        resolved: ResolvedName,
    },
    PidAvailable {
        instance_id: u32,
        pid: u32,
    },
    RunnerCompleted {
        runner_id: u64,
    },

    // Channel traffic
    InitializeResponded {
        instance_id: u32,
        connector: Option<ConnectorRequest>,
    },
    ShellClientLost {
        instance_id: u32,
    },
    Connector {
        instance_id: u32,
        message: ConnectorMessage,
    },
    ConnectorLost {
        instance_id: u32,
        binding_id: u64,
    },
    BindShell {
        source_id: u32,
        request: ShellRequest,
    },
    Shell {
        instance_id: u32,
        message: ShellMessage,
    },
    ShellClientFactoryLost {
        identity: Identity,
    },
}
