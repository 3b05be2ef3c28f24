//! Broker Interfaces
//!
//! Message sets for every channel the broker speaks over, and the typed
//! endpoint aliases built from them.

use std::fmt;

use tokio::sync::oneshot;

use crate::bindings::{AnyInterfaceRequest, InterfacePtr, InterfaceRequest};
use switchyard_protocol::{CapabilityRequest, ConnectResponse, Identity, InstanceInfo};

/// Interface name of the broker's own service interface.
pub const SHELL_INTERFACE: &str = "switchyard.Shell";

/// Interface name a package exposes to create services it hosts.
pub const SHELL_CLIENT_FACTORY_INTERFACE: &str = "switchyard.ShellClientFactory";

pub type ShellClientPtr = InterfacePtr<ShellClientMessage>;
pub type ShellClientRequest = InterfaceRequest<ShellClientMessage>;
pub type ConnectorPtr = InterfacePtr<ConnectorMessage>;
pub type ConnectorRequest = InterfaceRequest<ConnectorMessage>;
pub type InterfaceProviderPtr = InterfacePtr<InterfaceProviderMessage>;
pub type InterfaceProviderRequest = InterfaceRequest<InterfaceProviderMessage>;
pub type ShellClientFactoryPtr = InterfacePtr<ShellClientFactoryMessage>;
pub type ShellClientFactoryRequest = InterfaceRequest<ShellClientFactoryMessage>;
pub type PidReceiverPtr = InterfacePtr<PidReceiverMessage>;
pub type PidReceiverRequest = InterfaceRequest<PidReceiverMessage>;
pub type InstanceListenerPtr = InterfacePtr<InstanceListenerMessage>;
pub type InstanceListenerRequest = InterfaceRequest<InstanceListenerMessage>;
pub type ShellPtr = InterfacePtr<ShellMessage>;
pub type ShellRequest = InterfaceRequest<ShellMessage>;

// ── Connect completion ──────────────────────────────────────────────────────

/// One-shot completion for a connect attempt
pub struct ConnectCallback {
    inner: CallbackInner,
}

enum CallbackInner {
    Func(Box<dyn FnOnce(ConnectResponse) + Send>),
    Channel(oneshot::Sender<ConnectResponse>),
    Empty,
}

impl ConnectCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(ConnectResponse) + Send + 'static,
    {
        Self {
            inner: CallbackInner::Func(Box::new(f)),
        }
    }

    /// Callback delivering into a oneshot channel.
    pub fn channel() -> (Self, oneshot::Receiver<ConnectResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: CallbackInner::Channel(tx),
            },
            rx,
        )
    }

    /// Callback that discards the result.
    pub fn empty() -> Self {
        Self {
            inner: CallbackInner::Empty,
        }
    }

    pub fn run(self, response: ConnectResponse) {
        match self.inner {
            CallbackInner::Func(f) => f(response),
            CallbackInner::Channel(tx) => {
                // The caller may have given up; that is not an error here.
                let _ = tx.send(response);
            }
            CallbackInner::Empty => {}
        }
    }

    /// True when nobody is left to observe the result.
    pub fn is_abandoned(&self) -> bool {
        match &self.inner {
            CallbackInner::Channel(tx) => tx.is_closed(),
            _ => false,
        }
    }
}

impl Default for ConnectCallback {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ConnectCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            CallbackInner::Func(_) => "func",
            CallbackInner::Channel(_) => "channel",
            CallbackInner::Empty => "empty",
        };
        f.debug_struct("ConnectCallback").field("kind", &kind).finish()
    }
}

// ── ShellClient (broker → service) ──────────────────────────────────────────

/// A connection being handed to a service
#[derive(Debug)]
pub struct IncomingConnection {
    pub source: Identity,
    pub source_id: u32,
    /// Requests from the source for interfaces this service provides.
    pub remote_interfaces: Option<InterfaceProviderRequest>,
    /// Interfaces the source offers back.
    pub local_interfaces: Option<InterfaceProviderPtr>,
    pub allowed_capabilities: CapabilityRequest,
    /// Name the source asked for (differs from the package name for aliases).
    pub name: String,
}

#[derive(Debug)]
pub enum ShellClientMessage {
    /// First message on every control channel. The service may answer with a
    /// connector request for its outbound connections.
    Initialize {
        identity: Identity,
        id: u32,
        respond: oneshot::Sender<Option<ConnectorRequest>>,
    },
    AcceptConnection(IncomingConnection),
}

// ── Connector (service → broker) ────────────────────────────────────────────

/// Pre-established out-of-process client handed in by the process that
/// started it
#[derive(Debug, Default)]
pub struct ClientProcessConnection {
    pub shell_client_factory: Option<ShellClientFactoryPtr>,
    pub pid_receiver_request: Option<PidReceiverRequest>,
}

impl ClientProcessConnection {
    /// Both handles must be present together.
    pub fn is_complete(&self) -> bool {
        self.shell_client_factory.is_some() && self.pid_receiver_request.is_some()
    }
}

#[derive(Debug)]
pub enum ConnectorMessage {
    Connect {
        target: Identity,
        remote_interfaces: Option<InterfaceProviderRequest>,
        local_interfaces: Option<InterfaceProviderPtr>,
        client_process_connection: Option<ClientProcessConnection>,
        callback: ConnectCallback,
    },
    Clone {
        request: ConnectorRequest,
    },
}

// ── Auxiliary interfaces ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum InterfaceProviderMessage {
    GetInterface {
        name: String,
        request: AnyInterfaceRequest,
    },
}

#[derive(Debug)]
pub enum ShellClientFactoryMessage {
    CreateShellClient {
        request: ShellClientRequest,
        name: String,
    },
}

#[derive(Debug)]
pub enum PidReceiverMessage {
    SetPid(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceListenerMessage {
    SetExistingInstances(Vec<InstanceInfo>),
    InstanceCreated(InstanceInfo),
    InstanceDestroyed(u32),
    InstancePidAvailable { id: u32, pid: u32 },
}

#[derive(Debug)]
pub enum ShellMessage {
    AddInstanceListener { listener: InstanceListenerPtr },
}
