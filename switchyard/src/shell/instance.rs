//! Broker-side record of one service instance.
//!
//! An instance plays several roles at once: it drives the service's control
//! channel, serves the service's connectors, receives its pid and serves the
//! broker's own interface to it. Each role has its own `impl` block below.
//! Every channel an instance serves forwards into the control loop as a
//! `ShellEvent`; the instance itself never touches the registry.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use switchyard_protocol::capabilities::classes;
use switchyard_protocol::{
    generate_capability_request_for_connection, is_valid_name, is_valid_user_id,
    CapabilityRequest, CapabilitySpec, ConnectResponse, ConnectResult, Identity, InstanceInfo,
    ROOT_USER_ID, SHELL_NAME,
};

use super::events::ShellEvent;
use crate::bindings::WatchGuard;
use crate::connect_params::ConnectParams;
use crate::interfaces::{
    ClientProcessConnection, ConnectorRequest, IncomingConnection, PidReceiverMessage,
    PidReceiverRequest, ShellClientFactoryMessage, ShellClientFactoryPtr, ShellClientMessage,
    ShellClientPtr, ShellClientRequest, ShellRequest,
};

pub(crate) struct Instance {
    id: u32,
    identity: Identity,
    capability_spec: CapabilitySpec,
    allow_any_application: bool,
    shell_client: Option<ShellClientPtr>,
    shell_client_watch: Option<WatchGuard>,
    /// Caller-supplied factory that created the service.
    factory: Option<ShellClientFactoryPtr>,
    /// Set until the service answers (or drops) `Initialize`.
    awaiting_initialize: bool,
    connectors: HashMap<u64, JoinHandle<()>>,
    shell_bindings: Vec<JoinHandle<()>>,
    pid_receiver: Option<JoinHandle<()>>,
    runner_id: Option<u64>,
    pid: Option<u32>,
    created_at: String,
    events: mpsc::UnboundedSender<ShellEvent>,
}

impl Instance {
    pub(crate) fn new(
        id: u32,
        identity: Identity,
        capability_spec: CapabilitySpec,
        events: mpsc::UnboundedSender<ShellEvent>,
    ) -> Self {
        let allow_any_application = capability_spec.allows_any_target();
        Self {
            id,
            identity,
            capability_spec,
            allow_any_application,
            shell_client: None,
            shell_client_watch: None,
            factory: None,
            awaiting_initialize: false,
            connectors: HashMap::new(),
            shell_bindings: Vec::new(),
            pid_receiver: None,
            runner_id: None,
            pid: None,
            created_at: Utc::now().to_rfc3339(),
            events,
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn capability_spec(&self) -> &CapabilitySpec {
        &self.capability_spec
    }

    pub(crate) fn set_runner_id(&mut self, runner_id: u64) {
        self.runner_id = Some(runner_id);
    }

    pub(crate) fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            identity: self.identity.clone(),
            pid: self.pid,
            created_at: Some(self.created_at.clone()),
        }
    }

    /// What a source holding `source_spec` may use of this instance.
    pub(crate) fn capabilities_granted_to(&self, source_spec: &CapabilitySpec) -> CapabilityRequest {
        generate_capability_request_for_connection(source_spec, &self.identity, &self.capability_spec)
    }

    /// No channel keeps this instance alive any more.
    pub(crate) fn is_unreferenced(&self) -> bool {
        self.shell_client.is_none() && self.connectors.is_empty() && !self.awaiting_initialize
    }
}

// ── Client role: the service's control channel ──────────────────────────────

impl Instance {
    /// Bind the control channel and send `Initialize`.
    pub(crate) fn start_with_client(&mut self, client: ShellClientPtr) {
        let instance_id = self.id;

        let events = self.events.clone();
        self.shell_client_watch = Some(client.watch_closed(move || {
            let _ = events.send(ShellEvent::ShellClientLost { instance_id });
        }));

        let (respond, response) = oneshot::channel();
        let initialize = ShellClientMessage::Initialize {
            identity: self.identity.clone(),
            id: instance_id,
            respond,
        };
        if client.send(initialize).is_ok() {
            self.awaiting_initialize = true;
            let events = self.events.clone();
            tokio::spawn(async move {
                // A dropped responder means the service went away before answering.
                let connector = response.await.ok().flatten();
                let _ = events.send(ShellEvent::InitializeResponded {
                    instance_id,
                    connector,
                });
            });
        }

        self.shell_client = Some(client);
    }

    pub(crate) fn on_initialize_response(&mut self, connector: Option<ConnectorRequest>, binding_id: u64) {
        self.awaiting_initialize = false;
        if let Some(request) = connector {
            self.add_connector_binding(binding_id, request);
        }
    }

    pub(crate) fn on_shell_client_lost(&mut self) {
        debug!("Control channel of {} lost", self.identity);
        self.shell_client = None;
        self.shell_client_watch = None;
    }

    /// Complete `params` against this instance and hand the connection to the
    /// service with the capabilities granted to its source.
    pub(crate) fn connect_to_client(
        &mut self,
        mut params: ConnectParams,
        allowed_capabilities: CapabilityRequest,
        source_id: u32,
    ) {
        params.complete(ConnectResponse::succeeded(self.identity.user_id(), self.id));

        let connection = IncomingConnection {
            source: params.source().clone(),
            source_id,
            remote_interfaces: params.take_remote_interfaces(),
            local_interfaces: params.take_local_interfaces(),
            allowed_capabilities,
            name: params.target().name().to_string(),
        };

        let delivered = self
            .shell_client
            .as_ref()
            .map(|client| client.send(ShellClientMessage::AcceptConnection(connection)).is_ok())
            .unwrap_or(false);
        if !delivered {
            debug!("Connection to {} dropped: control channel closed", self.identity);
        }
    }

    /// Bind a caller-supplied factory and pid receiver, and ask the factory
    /// for this instance's service.
    pub(crate) fn start_with_client_process_connection(
        &mut self,
        request: ShellClientRequest,
        connection: ClientProcessConnection,
    ) {
        let ClientProcessConnection {
            shell_client_factory,
            pid_receiver_request,
        } = connection;

        if let Some(pid_receiver) = pid_receiver_request {
            self.bind_pid_receiver(pid_receiver);
        }

        let Some(factory) = shell_client_factory else {
            error!("Client process connection for {} has no factory", self.identity);
            return;
        };
        let message = ShellClientFactoryMessage::CreateShellClient {
            request,
            name: self.identity.name().to_string(),
        };
        if factory.send(message).is_err() {
            error!("Client process factory for {} is gone", self.identity);
        }
        self.factory = Some(factory);
    }
}

// ── Connector role: outbound connects issued by the service ─────────────────

impl Instance {
    pub(crate) fn add_connector_binding(&mut self, binding_id: u64, mut request: ConnectorRequest) {
        let instance_id = self.id;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = request.recv().await {
                if events
                    .send(ShellEvent::Connector {
                        instance_id,
                        message,
                    })
                    .is_err()
                {
                    return;
                }
            }
            let _ = events.send(ShellEvent::ConnectorLost {
                instance_id,
                binding_id,
            });
        });
        self.connectors.insert(binding_id, task);
    }

    pub(crate) fn on_connector_lost(&mut self, binding_id: u64) {
        self.connectors.remove(&binding_id);
    }

    pub(crate) fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Replace an inherited user with this instance's own.
    pub(crate) fn resolve_target(&self, target: Identity) -> Identity {
        let user_id = if target.inherits_user() {
            self.identity.user_id().to_string()
        } else {
            target.user_id().to_string()
        };
        Identity::with_instance(target.name(), user_id, target.instance())
    }

    /// Registering a process this instance started itself.
    /// `target_exists` reports whether the target (or its root form) is
    /// already running.
    pub(crate) fn validate_client_process_connection(
        &self,
        connection: &ClientProcessConnection,
        target: &Identity,
        target_exists: bool,
    ) -> Result<(), ConnectResult> {
        if !self.has_class(classes::CLIENT_PROCESS) {
            error!(
                "Instance {} attempting to register an instance for a process it created for target {} without the {}{{{}}} capability class",
                self.identity.name(),
                target.name(),
                SHELL_NAME,
                classes::CLIENT_PROCESS
            );
            return Err(ConnectResult::AccessDenied);
        }

        if !connection.is_complete() {
            error!(
                "Instance {} must supply both shell_client_factory and pid_receiver_request",
                self.identity.name()
            );
            return Err(ConnectResult::InvalidArgument);
        }

        if target_exists {
            error!("Cannot register a client process for running identity {}", target);
            return Err(ConnectResult::InvalidArgument);
        }

        Ok(())
    }

    pub(crate) fn validate_capabilities(&self, target: &Identity) -> Result<(), ConnectResult> {
        if target.user_id() != self.identity.user_id()
            && target.user_id() != ROOT_USER_ID
            && !self.has_class(classes::USER_ID)
        {
            error!(
                "Instance {} running as {} attempting to connect to {} as {} without the {}{{{}}} capability class",
                self.identity.name(),
                self.identity.user_id(),
                target.name(),
                target.user_id(),
                SHELL_NAME,
                classes::USER_ID
            );
            return Err(ConnectResult::AccessDenied);
        }

        if !target.has_default_instance() && !self.has_class(classes::INSTANCE_NAME) {
            error!(
                "Instance {} attempting to connect to {} using instance name {} without the {}{{{}}} capability class",
                self.identity.name(),
                target.name(),
                target.instance(),
                SHELL_NAME,
                classes::INSTANCE_NAME
            );
            return Err(ConnectResult::AccessDenied);
        }

        if self.allow_any_application || self.capability_spec.required.contains_key(target.name()) {
            return Ok(());
        }

        error!(
            "Capabilities prevented connection from {} to {}",
            self.identity.name(),
            target.name()
        );
        Err(ConnectResult::AccessDenied)
    }

    fn has_class(&self, class: &str) -> bool {
        self.capability_spec.has_class(SHELL_NAME, class)
    }
}

/// A target must carry a valid name and a concrete GUID user.
pub(crate) fn validate_identity(target: &Identity) -> Result<(), ConnectResult> {
    if !is_valid_name(target.name()) {
        error!("Invalid name: {}", target.name());
        return Err(ConnectResult::InvalidArgument);
    }
    if !is_valid_user_id(target.user_id()) {
        error!("Invalid user_id: {}", target.user_id());
        return Err(ConnectResult::InvalidArgument);
    }
    Ok(())
}

// ── Pid receiver role ───────────────────────────────────────────────────────

impl Instance {
    fn bind_pid_receiver(&mut self, mut request: PidReceiverRequest) {
        let instance_id = self.id;
        let events = self.events.clone();
        self.pid_receiver = Some(tokio::spawn(async move {
            while let Some(PidReceiverMessage::SetPid(pid)) = request.recv().await {
                if events
                    .send(ShellEvent::PidAvailable { instance_id, pid })
                    .is_err()
                {
                    return;
                }
            }
        }));
    }

    pub(crate) fn set_pid(&mut self, pid: u32) {
        self.pid = Some(pid);
    }

    /// Mark the instance as served from the broker's own process.
    pub(crate) fn set_in_process(&mut self) {
        self.pid = Some(std::process::id());
    }
}

// ── Shell role: the broker interface offered to this instance ───────────────

impl Instance {
    pub(crate) fn bind_shell_request(&mut self, mut request: ShellRequest) {
        let instance_id = self.id;
        let events = self.events.clone();
        self.shell_bindings.push(tokio::spawn(async move {
            while let Some(message) = request.recv().await {
                if events
                    .send(ShellEvent::Shell {
                        instance_id,
                        message,
                    })
                    .is_err()
                {
                    return;
                }
            }
        }));
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        for (_, task) in self.connectors.drain() {
            task.abort();
        }
        for task in self.shell_bindings.drain(..) {
            task.abort();
        }
        if let Some(task) = self.pid_receiver.take() {
            task.abort();
        }
    }
}
