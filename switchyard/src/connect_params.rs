//! Connect Parameters
//!
//! Move-only record of one pending connection, handed from stage to stage
//! and consumed exactly once.

use switchyard_protocol::{ConnectResponse, ConnectResult, Identity};
use tracing::debug;

use crate::interfaces::{
    ClientProcessConnection, ConnectCallback, InterfaceProviderPtr, InterfaceProviderRequest,
};

#[derive(Debug)]
pub struct ConnectParams {
    source: Identity,
    target: Identity,
    remote_interfaces: Option<InterfaceProviderRequest>,
    local_interfaces: Option<InterfaceProviderPtr>,
    client_process_connection: Option<ClientProcessConnection>,
    connect_callback: Option<ConnectCallback>,
}

impl ConnectParams {
    pub fn new(source: Identity, target: Identity) -> Self {
        Self {
            source,
            target,
            remote_interfaces: None,
            local_interfaces: None,
            client_process_connection: None,
            connect_callback: None,
        }
    }

    pub fn with_remote_interfaces(mut self, request: InterfaceProviderRequest) -> Self {
        self.remote_interfaces = Some(request);
        self
    }

    pub fn with_local_interfaces(mut self, ptr: InterfaceProviderPtr) -> Self {
        self.local_interfaces = Some(ptr);
        self
    }

    pub fn with_client_process_connection(mut self, connection: ClientProcessConnection) -> Self {
        self.client_process_connection = Some(connection);
        self
    }

    pub fn with_connect_callback(mut self, callback: ConnectCallback) -> Self {
        self.connect_callback = Some(callback);
        self
    }

    pub fn source(&self) -> &Identity {
        &self.source
    }

    pub fn target(&self) -> &Identity {
        &self.target
    }

    pub fn set_target(&mut self, target: Identity) {
        self.target = target;
    }

    pub fn take_remote_interfaces(&mut self) -> Option<InterfaceProviderRequest> {
        self.remote_interfaces.take()
    }

    pub fn take_local_interfaces(&mut self) -> Option<InterfaceProviderPtr> {
        self.local_interfaces.take()
    }

    pub fn take_client_process_connection(&mut self) -> Option<ClientProcessConnection> {
        self.client_process_connection.take()
    }

    /// Complete the connect. Later calls are no-ops.
    pub fn complete(&mut self, response: ConnectResponse) {
        if let Some(callback) = self.connect_callback.take() {
            callback.run(response);
        }
    }

    pub fn reject(&mut self, result: ConnectResult) {
        self.complete(ConnectResponse::rejected(result));
    }

    /// Nobody is waiting for the result and no channel the caller handed in
    /// is still open.
    pub fn is_abandoned(&self) -> bool {
        let callback_gone = self
            .connect_callback
            .as_ref()
            .map(ConnectCallback::is_abandoned)
            .unwrap_or(false);
        let local_gone = self
            .local_interfaces
            .as_ref()
            .map(|ptr| ptr.is_closed())
            .unwrap_or(true);
        callback_gone && local_gone && self.remote_interfaces.is_none()
    }
}

/// A connect that is dropped before completing reports `INVALID_ARGUMENT`.
impl Drop for ConnectParams {
    fn drop(&mut self) {
        if self.connect_callback.is_some() {
            debug!("Connect {} -> {} dropped unanswered", self.source, self.target);
            self.reject(ConnectResult::InvalidArgument);
        }
    }
}
