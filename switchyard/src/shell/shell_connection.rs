//! Service-Side Connection Helper
//!
//! Binds a control channel request to a `ShellClient` implementation, and
//! gives the service a `Connector` for its own outbound connects.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use switchyard_protocol::{CapabilityRequest, ConnectResponse, ConnectResult, Identity, INHERIT_USER_ID};

use crate::bindings::{
    interface_pair, AnyInterfaceRequest, ChannelClosed, InterfacePtr, InterfaceRequest,
};
use crate::interfaces::{
    ClientProcessConnection, ConnectCallback, ConnectorMessage, ConnectorPtr, ConnectorRequest,
    IncomingConnection, InterfaceProviderMessage, InterfaceProviderPtr, InterfaceProviderRequest,
    ShellClientMessage, ShellClientRequest,
};

/// A service as seen by the broker
pub trait ShellClient: Send + 'static {
    /// Called once, when the broker has assigned the service its identity.
    fn initialize(&mut self, _connector: &Connector, _identity: &Identity, _id: u32) {}

    /// Accept or refuse an incoming connection. Refused connections have
    /// their endpoints dropped.
    fn accept_connection(&mut self, connection: IncomingConnection) -> bool;

    /// The broker closed the control channel.
    fn shell_connection_lost(&mut self) {}
}

/// Serves one control channel for a `ShellClient`
///
/// The connector is usable immediately; its messages queue until the broker
/// binds it during `Initialize`. Dropping the connection closes the control
/// channel.
pub struct ShellConnection {
    connector: Connector,
    task: JoinHandle<()>,
}

impl ShellConnection {
    pub fn new<C: ShellClient>(client: C, request: ShellClientRequest) -> Self {
        let (connector_ptr, connector_request) = interface_pair();
        let connector = Connector::new(connector_ptr);
        let task = tokio::spawn(serve(
            client,
            request,
            connector.clone(),
            Some(connector_request),
        ));
        Self { connector, task }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }
}

impl Drop for ShellConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<C: ShellClient>(
    mut client: C,
    mut request: ShellClientRequest,
    connector: Connector,
    mut pending_connector: Option<ConnectorRequest>,
) {
    while let Some(message) = request.recv().await {
        match message {
            ShellClientMessage::Initialize {
                identity,
                id,
                respond,
            } => {
                let _ = respond.send(pending_connector.take());
                client.initialize(&connector, &identity, id);
            }
            ShellClientMessage::AcceptConnection(connection) => {
                let source = connection.source.clone();
                if !client.accept_connection(connection) {
                    debug!("Refused connection from {}", source);
                }
            }
        }
    }
    client.shell_connection_lost();
}

// ── Outbound connects ───────────────────────────────────────────────────────

/// Outbound connect request
#[derive(Debug)]
pub struct ConnectRequest {
    target: Identity,
    local_interfaces: Option<InterfaceProviderPtr>,
    client_process_connection: Option<ClientProcessConnection>,
}

impl ConnectRequest {
    /// Connect to `name` as the caller's own user.
    pub fn new(name: &str) -> Self {
        Self::for_identity(Identity::new(name, INHERIT_USER_ID))
    }

    pub fn for_identity(target: Identity) -> Self {
        Self {
            target,
            local_interfaces: None,
            client_process_connection: None,
        }
    }

    pub fn with_local_interfaces(mut self, provider: InterfaceProviderPtr) -> Self {
        self.local_interfaces = Some(provider);
        self
    }

    pub fn with_client_process_connection(mut self, connection: ClientProcessConnection) -> Self {
        self.client_process_connection = Some(connection);
        self
    }
}

/// Result of an outbound connect
#[derive(Debug)]
pub struct Connection {
    response: ConnectResponse,
    remote_interfaces: InterfaceProviderPtr,
}

impl Connection {
    pub fn response(&self) -> &ConnectResponse {
        &self.response
    }

    pub fn result(&self) -> ConnectResult {
        self.response.result
    }

    pub fn instance_id(&self) -> u32 {
        self.response.instance_id
    }

    /// Ask the target for an interface. The pointer closes if the target
    /// does not provide it or the connection was refused.
    pub fn get_interface<T: Send + 'static>(&self, name: &str) -> Result<InterfacePtr<T>, ChannelClosed> {
        let (ptr, request) = interface_pair::<T>();
        self.remote_interfaces
            .send(InterfaceProviderMessage::GetInterface {
                name: name.to_string(),
                request: AnyInterfaceRequest::new(request),
            })?;
        Ok(ptr)
    }
}

/// Client side of a connector channel
#[derive(Clone)]
pub struct Connector {
    ptr: Arc<ConnectorPtr>,
}

impl Connector {
    pub fn new(ptr: ConnectorPtr) -> Self {
        Self { ptr: Arc::new(ptr) }
    }

    /// Connect to a service and wait for the broker's verdict.
    pub async fn connect(&self, request: ConnectRequest) -> Result<Connection, ChannelClosed> {
        let (remote_interfaces, remote_request) = interface_pair();
        let (callback, response) = ConnectCallback::channel();
        self.ptr.send(ConnectorMessage::Connect {
            target: request.target,
            remote_interfaces: Some(remote_request),
            local_interfaces: request.local_interfaces,
            client_process_connection: request.client_process_connection,
            callback,
        })?;
        let response = response.await.map_err(|_| ChannelClosed)?;
        Ok(Connection {
            response,
            remote_interfaces,
        })
    }

    /// Open a second, independent connector channel.
    pub fn clone_connector(&self) -> Result<Connector, ChannelClosed> {
        let (ptr, request) = interface_pair();
        self.ptr.send(ConnectorMessage::Clone { request })?;
        Ok(Connector::new(ptr))
    }

    pub fn is_closed(&self) -> bool {
        self.ptr.is_closed()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("closed", &self.ptr.is_closed())
            .finish()
    }
}

// ── Incoming interface requests ─────────────────────────────────────────────

type Binder = Box<dyn FnMut(AnyInterfaceRequest) + Send>;

/// Binds interface requests arriving on one connection, limited to what the
/// connection's capabilities allow
pub struct InterfaceRegistry {
    allowed: CapabilityRequest,
    binders: HashMap<String, Binder>,
}

impl InterfaceRegistry {
    pub fn new(allowed: CapabilityRequest) -> Self {
        Self {
            allowed,
            binders: HashMap::new(),
        }
    }

    /// Register a binder for `name`. Returns false, registering nothing, when
    /// the connection may not use the interface.
    pub fn add_interface<T, F>(&mut self, name: &str, mut binder: F) -> bool
    where
        T: Send + 'static,
        F: FnMut(InterfaceRequest<T>) + Send + 'static,
    {
        if !self.allowed.allows_interface(name) {
            debug!("Interface {} not permitted on this connection", name);
            return false;
        }
        let interface = name.to_string();
        self.binders.insert(
            name.to_string(),
            Box::new(move |request: AnyInterfaceRequest| match request.downcast::<T>() {
                Ok(request) => binder(request),
                Err(_) => warn!("Request for {} has the wrong message type", interface),
            }),
        );
        true
    }

    /// Bind `request` to `name`. Unknown or disallowed names drop the request.
    pub fn bind(&mut self, name: &str, request: AnyInterfaceRequest) -> bool {
        match self.binders.get_mut(name) {
            Some(binder) => {
                binder(request);
                true
            }
            None => {
                debug!("No binder for interface {}", name);
                false
            }
        }
    }

    /// Serve `provider` until every pointer to it is gone.
    pub fn serve(mut self, mut provider: InterfaceProviderRequest) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(InterfaceProviderMessage::GetInterface { name, request }) =
                provider.recv().await
            {
                self.bind(&name, request);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_protocol::ROOT_USER_ID;
    use tokio::sync::{mpsc, oneshot};

    struct Recorder {
        accepted: mpsc::UnboundedSender<IncomingConnection>,
        lost: Option<oneshot::Sender<()>>,
    }

    impl ShellClient for Recorder {
        fn accept_connection(&mut self, connection: IncomingConnection) -> bool {
            let _ = self.accepted.send(connection);
            true
        }

        fn shell_connection_lost(&mut self) {
            if let Some(lost) = self.lost.take() {
                let _ = lost.send(());
            }
        }
    }

    #[tokio::test]
    async fn test_initialize_hands_out_connector() {
        let (client, request) = interface_pair();
        let (accepted, mut accepted_rx) = mpsc::unbounded_channel();
        let (lost, lost_rx) = oneshot::channel();
        let connection = ShellConnection::new(
            Recorder {
                accepted,
                lost: Some(lost),
            },
            request,
        );

        let (respond, connector) = oneshot::channel();
        client
            .send(ShellClientMessage::Initialize {
                identity: Identity::new("svc:a", ROOT_USER_ID),
                id: 1,
                respond,
            })
            .unwrap();
        let mut connector_request = connector.await.unwrap().expect("connector request");

        // Messages sent before Initialize were queued on the same channel.
        connection.connector().clone_connector().unwrap();
        assert!(matches!(
            connector_request.recv().await,
            Some(ConnectorMessage::Clone { .. })
        ));

        client
            .send(ShellClientMessage::AcceptConnection(IncomingConnection {
                source: Identity::new("svc:b", ROOT_USER_ID),
                source_id: 2,
                remote_interfaces: None,
                local_interfaces: None,
                allowed_capabilities: CapabilityRequest::default(),
                name: "svc:a".into(),
            }))
            .unwrap();
        assert_eq!(accepted_rx.recv().await.unwrap().source_id, 2);

        drop(client);
        tokio::time::timeout(Duration::from_secs(1), lost_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropping_connection_closes_control_channel() {
        let (client, request) = interface_pair();
        let (accepted, _accepted_rx) = mpsc::unbounded_channel();
        let connection = ShellConnection::new(Recorder { accepted, lost: None }, request);
        drop(connection);
        tokio::time::timeout(Duration::from_secs(1), client.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_reports_response() {
        let (ptr, mut request) = interface_pair();
        let connector = Connector::new(ptr);

        tokio::spawn(async move {
            if let Some(ConnectorMessage::Connect {
                target, callback, ..
            }) = request.recv().await
            {
                assert!(target.inherits_user());
                callback.run(ConnectResponse::rejected(ConnectResult::AccessDenied));
            }
        });

        let connection = connector.connect(ConnectRequest::new("svc:b")).await.unwrap();
        assert_eq!(connection.result(), ConnectResult::AccessDenied);
        assert_eq!(connection.instance_id(), 0);
    }

    #[tokio::test]
    async fn test_registry_respects_capabilities() {
        let allowed = CapabilityRequest::default().with_interface("echo.Echo");
        let mut registry = InterfaceRegistry::new(allowed);

        let (bound_tx, mut bound_rx) = mpsc::unbounded_channel::<InterfaceRequest<String>>();
        assert!(registry.add_interface::<String, _>("echo.Echo", move |request| {
            let _ = bound_tx.send(request);
        }));
        assert!(!registry.add_interface::<String, _>("admin.Admin", |_request| {}));

        let (provider, provider_request) = interface_pair();
        registry.serve(provider_request);

        let (echo, echo_request) = interface_pair::<String>();
        provider
            .send(InterfaceProviderMessage::GetInterface {
                name: "echo.Echo".into(),
                request: AnyInterfaceRequest::new(echo_request),
            })
            .unwrap();
        let mut echo_request = bound_rx.recv().await.unwrap();
        echo.send("hi".into()).unwrap();
        assert_eq!(echo_request.recv().await.as_deref(), Some("hi"));

        let (admin, admin_request) = interface_pair::<String>();
        provider
            .send(InterfaceProviderMessage::GetInterface {
                name: "admin.Admin".into(),
                request: AnyInterfaceRequest::new(admin_request),
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), admin.closed())
            .await
            .unwrap();
    }

    #[test]
    fn test_wildcard_registry_accepts_anything() {
        let mut registry = InterfaceRegistry::new(CapabilityRequest::any_interface());
        assert!(registry.add_interface::<u32, _>("any.Thing", |_request| {}));
        let (_ptr, request) = interface_pair::<u32>();
        assert!(registry.bind("any.Thing", AnyInterfaceRequest::new(request)));
        let (_ptr, request) = interface_pair::<u32>();
        assert!(!registry.bind("other.Thing", AnyInterfaceRequest::new(request)));
    }
}
