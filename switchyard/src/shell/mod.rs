//! Service Broker
//!
//! A single control loop owns every instance, the identity registry, loaders,
//! runners and listeners. Handles, resolver completions, runner callbacks and
//! channel traffic all reach it as events, so no state is ever shared.

mod events;
mod instance;
mod service;
pub mod shell_connection;


use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use switchyard_protocol::{
    is_valid_name, is_valid_user_id, name_path, permissive_capabilities, shell_identity,
    CapabilityRequest, CapabilitySpec, ConnectResponse, ConnectResult, Identity, InstanceInfo,
    INVALID_INSTANCE_ID, ROOT_USER_ID, SHELL_NAME,
};

use crate::bindings::{interface_pair, AnyInterfaceRequest, ChannelClosed, WatchGuard};
use crate::config::{ShellConfig, UnresolvedNamePolicy};
use crate::connect_params::ConnectParams;
use crate::interfaces::{
    ConnectorMessage, InstanceListenerMessage, InstanceListenerPtr, InterfaceProviderMessage,
    ShellClientFactoryMessage, ShellClientFactoryPtr, ShellClientPtr, ShellClientRequest,
    ShellMessage, SHELL_CLIENT_FACTORY_INTERFACE,
};
use crate::loader::Loader;
use crate::resolver::{ResolvedName, Resolver};
use crate::runner::{NativeRunner, NativeRunnerFactory};

use events::{Inspector, ShellEvent};
use instance::{validate_identity, Instance};
use service::ShellService;

pub use events::InstanceQuitCallback;
pub use shell_connection::{
    ConnectRequest, Connection, Connector, InterfaceRegistry, ShellClient, ShellConnection,
};

/// Identity the broker connects from on its own behalf.
pub static SHELL_IDENTITY: Lazy<Identity> = Lazy::new(shell_identity);

/// Launch and resolution policy
#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    pub start_sandboxed: bool,
    pub unresolved_names: UnresolvedNamePolicy,
}

impl ShellOptions {
    pub fn from_config(config: &ShellConfig) -> Self {
        Self {
            start_sandboxed: config.start_sandboxed,
            unresolved_names: config.unresolved_names,
        }
    }
}

/// A connect suspended on name resolution
struct PendingConnect {
    params: ConnectParams,
    client: Option<ShellClientPtr>,
}

struct CachedFactory {
    ptr: ShellClientFactoryPtr,
    _watch: WatchGuard,
}

/// Broker state, owned by the control loop
pub struct Shell {
    events: mpsc::UnboundedSender<ShellEvent>,
    options: ShellOptions,
    resolver: Arc<dyn Resolver>,
    native_runner_factory: Box<dyn NativeRunnerFactory>,

    instances: BTreeMap<u32, Instance>,
    identity_to_instance: HashMap<Identity, u32>,
    next_instance_id: u32,

    name_to_loader: HashMap<String, Box<dyn Loader>>,
    default_loader: Option<Box<dyn Loader>>,
    shell_client_factories: HashMap<Identity, CachedFactory>,
    runners: HashMap<u64, Box<dyn NativeRunner>>,
    next_runner_id: u64,

    pending_resolves: HashMap<u64, PendingConnect>,
    next_request_token: u64,
    next_binding_id: u64,

    listeners: Vec<InstanceListenerPtr>,
    instance_quit_callback: Option<InstanceQuitCallback>,
    shell_connection: Option<ShellConnection>,
}

impl Shell {
    /// Start the control loop on the current tokio runtime.
    ///
    /// The broker registers itself as `svc:shell` (root user, permissive
    /// capabilities) before the returned handle accepts any call.
    pub fn spawn(
        resolver: Arc<dyn Resolver>,
        native_runner_factory: Box<dyn NativeRunnerFactory>,
        options: ShellOptions,
    ) -> ShellHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut shell = Shell {
            events: events_tx.clone(),
            options,
            resolver,
            native_runner_factory,
            instances: BTreeMap::new(),
            identity_to_instance: HashMap::new(),
            next_instance_id: INVALID_INSTANCE_ID + 1,
            name_to_loader: HashMap::new(),
            default_loader: None,
            shell_client_factories: HashMap::new(),
            runners: HashMap::new(),
            next_runner_id: 1,
            pending_resolves: HashMap::new(),
            next_request_token: 1,
            next_binding_id: 1,
            listeners: Vec::new(),
            instance_quit_callback: None,
            shell_connection: None,
        };

        let (client, request) = interface_pair();
        shell.create_instance(SHELL_IDENTITY.clone(), permissive_capabilities(), client);
        shell.shell_connection = Some(ShellConnection::new(
            ShellService::new(events_tx.clone()),
            request,
        ));

        tokio::spawn(shell.run(events_rx));
        ShellHandle { events: events_tx }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ShellEvent>) {
        info!("Shell started");
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        info!("Shell stopped");
    }

    /// Returns false once the loop should stop.
    fn handle_event(&mut self, event: ShellEvent) -> bool {
        match event {
            ShellEvent::Connect { params, client } => self.connect(params, client),
            ShellEvent::SetLoaderForName { name, loader } => self.set_loader_for_name(name, loader),
            ShellEvent::SetDefaultLoader(loader) => self.default_loader = Some(loader),
            ShellEvent::SetInstanceQuitCallback(callback) => {
                self.instance_quit_callback = Some(callback)
            }
            ShellEvent::AddInstanceListener(listener) => self.add_instance_listener(listener),
            ShellEvent::Inspect(inspector) => inspector(&*self),
            ShellEvent::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }

            ShellEvent::Resolved { token, resolved } => self.on_resolved(token, resolved),
            ShellEvent::PidAvailable { instance_id, pid } => self.on_pid_available(instance_id, pid),
            ShellEvent::RunnerCompleted { runner_id } => self.cleanup_runner(runner_id),

            ShellEvent::InitializeResponded {
                instance_id,
                connector,
            } => {
                let binding_id = self.next_binding_id();
                if let Some(instance) = self.instances.get_mut(&instance_id) {
                    instance.on_initialize_response(connector, binding_id);
                }
                self.on_connection_lost(instance_id);
            }
            ShellEvent::ShellClientLost { instance_id } => {
                if let Some(instance) = self.instances.get_mut(&instance_id) {
                    instance.on_shell_client_lost();
                }
                self.on_connection_lost(instance_id);
            }
            ShellEvent::Connector {
                instance_id,
                message,
            } => self.on_connector_message(instance_id, message),
            ShellEvent::ConnectorLost {
                instance_id,
                binding_id,
            } => {
                if let Some(instance) = self.instances.get_mut(&instance_id) {
                    instance.on_connector_lost(binding_id);
                }
                self.on_connection_lost(instance_id);
            }
            ShellEvent::BindShell { source_id, request } => {
                match self.instances.get_mut(&source_id) {
                    Some(instance) => instance.bind_shell_request(request),
                    None => warn!("Shell interface requested by unknown instance {}", source_id),
                }
            }
            ShellEvent::Shell {
                instance_id,
                message,
            } => match message {
                ShellMessage::AddInstanceListener { listener } => {
                    debug!("Instance {} added an instance listener", instance_id);
                    self.add_instance_listener(listener);
                }
            },
            ShellEvent::ShellClientFactoryLost { identity } => {
                self.on_shell_client_factory_lost(identity)
            }
        }
        true
    }

    // ── Connect routing ─────────────────────────────────────────────────────

    fn connect(&mut self, params: ConnectParams, client: Option<ShellClientPtr>) {
        let target = params.target().clone();
        assert!(is_valid_name(target.name()), "invalid target name: {}", target.name());
        assert!(
            is_valid_user_id(target.user_id()),
            "invalid target user: {}",
            target.user_id()
        );
        assert!(!target.inherits_user(), "target user must be resolved before connect");
        if client.is_some() && self.identity_to_instance.contains_key(&target) {
            error!("{} is already running, refusing a second embedder client", target);
            return;
        }

        debug!("Connect {} -> {}", params.source(), target);

        let params = match client {
            Some(_) => params,
            None => match self.try_connect_to_existing_instance(params) {
                Some(params) => params,
                None => return,
            },
        };

        let token = self.next_request_token;
        self.next_request_token += 1;
        self.pending_resolves
            .insert(token, PendingConnect { params, client });

        let resolver = Arc::clone(&self.resolver);
        let events = self.events.clone();
        let name = target.name().to_string();
        debug!("Resolving {} (request {})", name, token);
        tokio::spawn(async move {
            let resolved = resolver.resolve_name(&name).await;
            let _ = events.send(ShellEvent::Resolved { token, resolved });
        });
    }

    /// Deliver to a running instance for the target, or its root-user form.
    /// Hands `params` back when there is none.
    fn try_connect_to_existing_instance(&mut self, params: ConnectParams) -> Option<ConnectParams> {
        match self.get_existing_or_root_instance(params.target()) {
            Some(id) => {
                self.connect_to_client(id, params);
                None
            }
            None => Some(params),
        }
    }

    fn get_existing_instance(&self, identity: &Identity) -> Option<u32> {
        self.identity_to_instance.get(identity).copied()
    }

    fn get_existing_or_root_instance(&self, identity: &Identity) -> Option<u32> {
        self.get_existing_instance(identity)
            .or_else(|| self.get_existing_instance(&identity.for_user(ROOT_USER_ID)))
    }

    fn connect_to_client(&mut self, id: u32, mut params: ConnectParams) {
        let Some(target) = self.instances.get(&id) else {
            error!("Connect routed to missing instance {}", id);
            params.reject(ConnectResult::InvalidArgument);
            return;
        };

        let source = self
            .get_existing_instance(params.source())
            .and_then(|source_id| self.instances.get(&source_id));
        let (allowed_capabilities, source_id) = match source {
            Some(source) => (
                target.capabilities_granted_to(source.capability_spec()),
                source.id(),
            ),
            None => (CapabilityRequest::any_interface(), INVALID_INSTANCE_ID),
        };

        if let Some(target) = self.instances.get_mut(&id) {
            target.connect_to_client(params, allowed_capabilities, source_id);
        }
    }

    fn on_resolved(&mut self, token: u64, resolved: ResolvedName) {
        let Some(PendingConnect { mut params, client }) = self.pending_resolves.remove(&token) else {
            return;
        };
        debug!(
            "Resolved {} to {} (request {})",
            params.target().name(),
            resolved.resolved_name,
            token
        );

        if client.is_none() && params.is_abandoned() {
            debug!("Dropping abandoned connect to {}", params.target());
            return;
        }

        let requested = params.target().clone();
        let mut instance_name = requested.instance().to_string();
        if instance_name == name_path(requested.name())
            && resolved.resolved_instance != name_path(&resolved.resolved_name)
        {
            instance_name = resolved.resolved_instance.clone();
        }
        let target = Identity::with_instance(requested.name(), requested.user_id(), instance_name);
        params.set_target(target.clone());

        // Another connect for the same name may have won while this one was resolving.
        let Some(mut params) = self.try_connect_to_existing_instance(params) else {
            return;
        };

        let capabilities = match resolved.capabilities {
            Some(capabilities) => capabilities,
            None => match self.options.unresolved_names {
                UnresolvedNamePolicy::Permissive => permissive_capabilities(),
                UnresolvedNamePolicy::Reject => {
                    error!("No manifest for {}, rejecting connect", target.name());
                    params.reject(ConnectResult::InvalidArgument);
                    return;
                }
            },
        };

        let client_process_connection = params.take_client_process_connection();
        let (client, request) = match client {
            Some(client) => (client, None),
            None => {
                let (client, request) = interface_pair();
                (client, Some(request))
            }
        };

        let id = self.create_instance(target.clone(), capabilities, client);
        self.connect_to_client(id, params);

        // A caller-held client needs nothing more.
        let Some(request) = request else {
            return;
        };

        if let Some(connection) = client_process_connection {
            if let Some(instance) = self.instances.get_mut(&id) {
                instance.start_with_client_process_connection(request, connection);
            }
            return;
        }

        if let Some(loader) = self.loader_for_name(target.name()) {
            debug!("Loading {} in process", target);
            loader.load(target.name(), request);
            return;
        }

        if target.name() != resolved.resolved_name {
            // Aliases keep the requested instance rather than the package's own.
            let factory = Identity::with_instance(
                resolved.resolved_name.as_str(),
                target.user_id(),
                target.instance(),
            );
            self.create_shell_client(SHELL_IDENTITY.clone(), factory, target.name(), request);
            return;
        }

        match resolved.package_path {
            Some(path) => self.start_with_file_path(id, &path, request),
            None => error!("No package found for {}, dropping its control channel", target),
        }
    }

    // ── Instance lifecycle ──────────────────────────────────────────────────

    fn create_instance(&mut self, target: Identity, spec: CapabilitySpec, client: ShellClientPtr) -> u32 {
        assert!(!target.inherits_user(), "instance identity must carry a concrete user");
        debug_assert!(!self.identity_to_instance.contains_key(&target));

        let id = self.next_instance_id;
        self.next_instance_id = match id.checked_add(1) {
            Some(next) => next,
            None => panic!("instance id space exhausted"),
        };

        let mut instance = Instance::new(id, target.clone(), spec, self.events.clone());
        if target.name() == SHELL_NAME || self.has_loader_for_name(target.name()) {
            instance.set_in_process();
        }
        let info = instance.info();

        self.identity_to_instance.insert(target, id);
        self.instances.insert(id, instance);
        info!("Created instance {} for {}", id, info.identity);
        self.notify_listeners(InstanceListenerMessage::InstanceCreated(info));

        if let Some(instance) = self.instances.get_mut(&id) {
            instance.start_with_client(client);
        }
        id
    }

    fn start_with_file_path(&mut self, id: u32, path: &Path, request: ShellClientRequest) {
        let mut runner = self.native_runner_factory.create(path);
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };

        let runner_id = self.next_runner_id;
        self.next_runner_id += 1;

        let pid_events = self.events.clone();
        let completed_events = self.events.clone();
        runner.start(
            path,
            instance.identity(),
            self.options.start_sandboxed,
            request,
            Box::new(move |pid| {
                let _ = pid_events.send(ShellEvent::PidAvailable {
                    instance_id: id,
                    pid,
                });
            }),
            Box::new(move || {
                let _ = completed_events.send(ShellEvent::RunnerCompleted { runner_id });
            }),
        );
        instance.set_runner_id(runner_id);
        info!("Started runner {} for {} from {:?}", runner_id, instance.identity(), path);
        self.runners.insert(runner_id, runner);
    }

    /// Destroy the instance once neither its control channel nor any
    /// connector keeps it alive.
    fn on_connection_lost(&mut self, id: u32) {
        let unreferenced = self
            .instances
            .get(&id)
            .map(Instance::is_unreferenced)
            .unwrap_or(false);
        if unreferenced {
            self.on_instance_error(id);
        }
    }

    fn on_instance_error(&mut self, id: u32) {
        let Some(instance) = self.instances.remove(&id) else {
            return;
        };
        let identity = instance.identity().clone();
        self.identity_to_instance.remove(&identity);
        drop(instance);

        info!("Destroyed instance {} for {}", id, identity);
        self.notify_listeners(InstanceListenerMessage::InstanceDestroyed(id));
        if let Some(callback) = self.instance_quit_callback.as_mut() {
            callback(&identity);
        }
    }

    fn on_pid_available(&mut self, id: u32, pid: u32) {
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };
        instance.set_pid(pid);
        debug!("Instance {} has pid {}", id, pid);
        self.notify_listeners(InstanceListenerMessage::InstancePidAvailable { id, pid });
    }

    fn cleanup_runner(&mut self, runner_id: u64) {
        if self.runners.remove(&runner_id).is_some() {
            debug!("Runner {} completed", runner_id);
        }
    }

    fn next_binding_id(&mut self) -> u64 {
        let id = self.next_binding_id;
        self.next_binding_id += 1;
        id
    }

    fn shutdown(&mut self) {
        info!("Shutting down {} instances", self.instances.len());
        self.pending_resolves.clear();
        self.shell_connection = None;
        self.shell_client_factories.clear();
        self.identity_to_instance.clear();
        self.instances.clear();
        self.name_to_loader.clear();
        self.default_loader = None;
        self.runners.clear();
        self.listeners.clear();
    }

    // ── Connector traffic ───────────────────────────────────────────────────

    fn on_connector_message(&mut self, instance_id: u32, message: ConnectorMessage) {
        match message {
            ConnectorMessage::Connect {
                target,
                remote_interfaces,
                local_interfaces,
                client_process_connection,
                callback,
            } => {
                let Some(source) = self.instances.get(&instance_id) else {
                    return;
                };
                let target = source.resolve_target(target);

                let verdict = validate_identity(&target)
                    .and_then(|()| match &client_process_connection {
                        Some(connection) => source.validate_client_process_connection(
                            connection,
                            &target,
                            self.get_existing_or_root_instance(&target).is_some(),
                        ),
                        None => Ok(()),
                    })
                    .and_then(|()| source.validate_capabilities(&target));
                if let Err(result) = verdict {
                    callback.run(ConnectResponse::rejected(result));
                    return;
                }

                let mut params = ConnectParams::new(source.identity().clone(), target)
                    .with_connect_callback(callback);
                if let Some(request) = remote_interfaces {
                    params = params.with_remote_interfaces(request);
                }
                if let Some(provider) = local_interfaces {
                    params = params.with_local_interfaces(provider);
                }
                if let Some(connection) = client_process_connection {
                    params = params.with_client_process_connection(connection);
                }
                self.connect(params, None);
            }
            ConnectorMessage::Clone { request } => {
                let binding_id = self.next_binding_id();
                if let Some(instance) = self.instances.get_mut(&instance_id) {
                    instance.add_connector_binding(binding_id, request);
                }
            }
        }
    }

    // ── Loaders ─────────────────────────────────────────────────────────────

    fn set_loader_for_name(&mut self, name: String, loader: Box<dyn Loader>) {
        if self.name_to_loader.insert(name.clone(), loader).is_some() {
            debug!("Replaced loader for {}", name);
        }
    }

    fn loader_for_name(&mut self, name: &str) -> Option<&mut Box<dyn Loader>> {
        match self.name_to_loader.get_mut(name) {
            Some(loader) => Some(loader),
            None => self.default_loader.as_mut(),
        }
    }

    fn has_loader_for_name(&self, name: &str) -> bool {
        self.name_to_loader.contains_key(name) || self.default_loader.is_some()
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    fn add_instance_listener(&mut self, listener: InstanceListenerPtr) {
        let existing = self.instances.values().map(Instance::info).collect();
        if listener
            .send(InstanceListenerMessage::SetExistingInstances(existing))
            .is_ok()
        {
            self.listeners.push(listener);
        }
    }

    fn notify_listeners(&mut self, message: InstanceListenerMessage) {
        self.listeners
            .retain(|listener| listener.send(message.clone()).is_ok());
    }

    // ── Package factories ───────────────────────────────────────────────────

    fn create_shell_client(
        &mut self,
        source: Identity,
        factory_identity: Identity,
        name: &str,
        request: ShellClientRequest,
    ) {
        let factory = self.get_shell_client_factory(factory_identity, source);
        let message = ShellClientFactoryMessage::CreateShellClient {
            request,
            name: name.to_string(),
        };
        if factory.send(message).is_err() {
            warn!("Package factory for {} is gone", name);
        }
    }

    fn get_shell_client_factory(&mut self, identity: Identity, source: Identity) -> &ShellClientFactoryPtr {
        if !self.shell_client_factories.contains_key(&identity) {
            let (remote_interfaces, remote_request) = interface_pair();
            self.connect(
                ConnectParams::new(source, identity.clone()).with_remote_interfaces(remote_request),
                None,
            );

            let (factory, factory_request) = interface_pair::<ShellClientFactoryMessage>();
            let _ = remote_interfaces.send(InterfaceProviderMessage::GetInterface {
                name: SHELL_CLIENT_FACTORY_INTERFACE.to_string(),
                request: AnyInterfaceRequest::new(factory_request),
            });

            let events = self.events.clone();
            let lost = identity.clone();
            let watch = factory.watch_closed(move || {
                let _ = events.send(ShellEvent::ShellClientFactoryLost { identity: lost });
            });
            self.shell_client_factories.insert(
                identity.clone(),
                CachedFactory {
                    ptr: factory,
                    _watch: watch,
                },
            );
        }
        &self.shell_client_factories[&identity].ptr
    }

    fn on_shell_client_factory_lost(&mut self, identity: Identity) {
        let closed = self
            .shell_client_factories
            .get(&identity)
            .map(|factory| factory.ptr.is_closed())
            .unwrap_or(false);
        if closed {
            debug!("Package factory for {} lost", identity);
            self.shell_client_factories.remove(&identity);
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────────────

/// Cloneable entry point into a running broker
#[derive(Clone)]
pub struct ShellHandle {
    events: mpsc::UnboundedSender<ShellEvent>,
}

impl ShellHandle {
    /// Route a connect request.
    ///
    /// # Panics
    /// If the target name is malformed or its user is not a concrete GUID.
    pub fn connect(&self, params: ConnectParams) {
        let target = params.target();
        assert!(is_valid_name(target.name()), "invalid target name: {}", target.name());
        assert!(
            is_valid_user_id(target.user_id()),
            "invalid target user: {}",
            target.user_id()
        );
        assert!(!target.inherits_user(), "target user must be resolved before connect");
        self.post(ShellEvent::Connect {
            params,
            client: None,
        });
    }

    /// Register `name` (root user) as an instance whose control channel the
    /// embedder serves through the returned request.
    ///
    /// If `name` is already running the request is closed without an
    /// `Initialize`.
    pub fn init_instance_for_embedder(&self, name: &str) -> ShellClientRequest {
        assert!(is_valid_name(name), "invalid embedder name: {}", name);
        let identity = Identity::new(name, ROOT_USER_ID);
        let params = ConnectParams::new(identity.clone(), identity);
        let (client, request) = interface_pair();
        self.post(ShellEvent::Connect {
            params,
            client: Some(client),
        });
        request
    }

    /// Serve `name` in process. Replaces any loader already set for it.
    pub fn set_loader_for_name(&self, name: impl Into<String>, loader: Box<dyn Loader>) {
        self.post(ShellEvent::SetLoaderForName {
            name: name.into(),
            loader,
        });
    }

    /// Loader for every name without a specific one.
    pub fn set_default_loader(&self, loader: Box<dyn Loader>) {
        self.post(ShellEvent::SetDefaultLoader(loader));
    }

    pub fn set_instance_quit_callback<F>(&self, callback: F)
    where
        F: FnMut(&Identity) + Send + 'static,
    {
        self.post(ShellEvent::SetInstanceQuitCallback(Box::new(callback)));
    }

    pub fn add_instance_listener(&self, listener: InstanceListenerPtr) {
        self.post(ShellEvent::AddInstanceListener(listener));
    }

    /// Snapshot of every registered instance, ordered by id.
    pub async fn instances(&self) -> Result<Vec<InstanceInfo>, ChannelClosed> {
        self.inspect(|shell| shell.instances.values().map(Instance::info).collect())
            .await
    }

    pub fn test_api(&self) -> TestApi {
        TestApi {
            handle: self.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    /// Tear down every instance without notifications and stop the loop.
    pub async fn shutdown(&self) {
        let (done, stopped) = oneshot::channel();
        if self.events.send(ShellEvent::Shutdown(done)).is_ok() {
            let _ = stopped.await;
        }
    }

    async fn inspect<R, F>(&self, f: F) -> Result<R, ChannelClosed>
    where
        R: Send + 'static,
        F: FnOnce(&Shell) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inspector: Inspector = Box::new(move |shell: &Shell| {
            let _ = tx.send(f(shell));
        });
        self.events
            .send(ShellEvent::Inspect(inspector))
            .map_err(|_| ChannelClosed)?;
        rx.await.map_err(|_| ChannelClosed)
    }

    fn post(&self, event: ShellEvent) {
        if self.events.send(event).is_err() {
            warn!("Shell is not running, dropping request");
        }
    }
}

/// Read-only introspection, evaluated on the control loop
pub struct TestApi {
    handle: ShellHandle,
}

impl TestApi {
    pub async fn has_running_instance_for_name(&self, name: &str) -> bool {
        let name = name.to_string();
        self.handle
            .inspect(move |shell| {
                shell
                    .identity_to_instance
                    .keys()
                    .any(|identity| identity.name() == name)
            })
            .await
            .unwrap_or(false)
    }

    pub async fn instances(&self) -> Vec<InstanceInfo> {
        self.handle.instances().await.unwrap_or_default()
    }

    pub async fn runner_count(&self) -> usize {
        self.handle
            .inspect(|shell| shell.runners.len())
            .await
            .unwrap_or(0)
    }

    /// Listeners still registered; closed ones are pruned on the next notification.
    pub async fn listener_count(&self) -> usize {
        self.handle
            .inspect(|shell| shell.listeners.len())
            .await
            .unwrap_or(0)
    }

    pub async fn connector_count(&self, instance_id: u32) -> usize {
        self.handle
            .inspect(move |shell| {
                shell
                    .instances
                    .get(&instance_id)
                    .map(Instance::connector_count)
                    .unwrap_or(0)
            })
            .await
            .unwrap_or(0)
    }
}
