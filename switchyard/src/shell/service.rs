//! The broker's own service (`svc:shell`).
//!
//! Offers `switchyard.Shell` to connecting instances. Each binding is routed
//! to the connecting instance's shell role, so the caller's identity decides
//! what it may do.

use tokio::sync::mpsc;
use tracing::debug;

use super::events::ShellEvent;
use super::shell_connection::{InterfaceRegistry, ShellClient};
use crate::interfaces::{IncomingConnection, ShellMessage, SHELL_INTERFACE};

pub(crate) struct ShellService {
    events: mpsc::UnboundedSender<ShellEvent>,
}

impl ShellService {
    pub(crate) fn new(events: mpsc::UnboundedSender<ShellEvent>) -> Self {
        Self { events }
    }
}

impl ShellClient for ShellService {
    fn accept_connection(&mut self, connection: IncomingConnection) -> bool {
        let Some(remote_interfaces) = connection.remote_interfaces else {
            // Nothing to serve; the connect itself still succeeded.
            return true;
        };

        let source_id = connection.source_id;
        let events = self.events.clone();
        let mut registry = InterfaceRegistry::new(connection.allowed_capabilities);
        let offered = registry.add_interface::<ShellMessage, _>(SHELL_INTERFACE, move |request| {
            let _ = events.send(ShellEvent::BindShell { source_id, request });
        });
        if !offered {
            debug!("{} may not use {}", connection.source, SHELL_INTERFACE);
            return false;
        }

        registry.serve(remote_interfaces);
        true
    }
}
