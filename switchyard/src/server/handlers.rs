//! Control Method Handlers
//!
//! Dispatches control-socket requests to the broker.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use switchyard_protocol::{
    is_valid_name, is_valid_user_id, ConnectResult, Identity, JsonRpcRequest, JsonRpcResponse,
    ROOT_USER_ID,
};

use super::ServerState;
use crate::common::{AppError, AppResult};
use crate::connect_params::ConnectParams;
use crate::interfaces::ConnectCallback;
use crate::shell::{ShellHandle, SHELL_IDENTITY};

/// Extract a required string parameter
fn require_string<'a>(params: &'a Value, key: &str) -> AppResult<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::invalid_params(format!("Missing '{}' parameter", key)))
}

/// Extract an optional string parameter
fn optional_string<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Handler registry - dispatches requests to the broker
pub struct HandlerRegistry {
    shell: ShellHandle,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HandlerRegistry {
    pub fn new(shell: ShellHandle, state: Arc<ServerState>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            shell,
            state,
            shutdown_tx,
        }
    }

    /// Handle a JSON-RPC request
    pub async fn handle(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);

        debug!("Handling method: {}", request.method);

        let result = match request.method.as_str() {
            "shell.status" => self.status().await,
            "instances.list" => self.list_instances().await,
            "shell.connect" => self.connect(&request.params).await,
            "server.shutdown" => self.shutdown(),
            other => Err(AppError::method_not_found(other)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                let (code, message) = e.to_tuple();
                JsonRpcResponse::error(id, code, message, e.data)
            }
        }
    }

    async fn status(&self) -> AppResult<Value> {
        let instances = self
            .shell
            .instances()
            .await
            .map_err(|_| AppError::shell_unavailable())?;
        Ok(json!({
            "status": "running",
            "version": env!("CARGO_PKG_VERSION"),
            "instances": instances.len(),
            "connections_total": *self.state.connection_count.read().await,
            "connections_active": *self.state.active_connections.read().await,
        }))
    }

    async fn list_instances(&self) -> AppResult<Value> {
        let instances = self
            .shell
            .instances()
            .await
            .map_err(|_| AppError::shell_unavailable())?;
        serde_json::to_value(instances).map_err(|e| AppError::from(e.to_string()))
    }

    /// Connect from the broker's own identity, starting the target if needed.
    async fn connect(&self, params: &Value) -> AppResult<Value> {
        let name = require_string(params, "name")?;
        if !is_valid_name(name) {
            return Err(AppError::invalid_params(format!("Invalid name: {}", name)));
        }
        let user_id = optional_string(params, "user_id").unwrap_or(ROOT_USER_ID);
        if !is_valid_user_id(user_id) {
            return Err(AppError::invalid_params(format!("Invalid user_id: {}", user_id)));
        }
        let target = match optional_string(params, "instance") {
            Some(instance) => Identity::with_instance(name, user_id, instance),
            None => Identity::new(name, user_id),
        };

        if !self.shell.is_running() {
            return Err(AppError::shell_unavailable());
        }
        info!("Control socket connect to {}", target);
        let (callback, response) = ConnectCallback::channel();
        self.shell
            .connect(ConnectParams::new(SHELL_IDENTITY.clone(), target).with_connect_callback(callback));

        let response = response.await.map_err(|_| AppError::shell_unavailable())?;
        if response.result != ConnectResult::Succeeded {
            return Err(AppError::connect_rejected(response.result, name)
                .with_data(serde_json::to_value(&response).unwrap_or_default()));
        }
        serde_json::to_value(response).map_err(|e| AppError::from(e.to_string()))
    }

    fn shutdown(&self) -> AppResult<Value> {
        info!("Shutdown requested over control socket");
        let _ = self.shutdown_tx.send(());
        Ok(json!({"message": "Shutdown initiated"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolvedName, Resolver};
    use crate::runner::{NativeRunner, NativeRunnerFactory};
    use crate::shell::{Shell, ShellOptions};
    use async_trait::async_trait;
    use std::path::Path;
    use switchyard_protocol::jsonrpc::codes;

    struct Unresolved;

    #[async_trait]
    impl Resolver for Unresolved {
        async fn resolve_name(&self, name: &str) -> ResolvedName {
            ResolvedName::unresolved(name)
        }
    }

    struct NoRunners;

    impl NativeRunnerFactory for NoRunners {
        fn create(&self, _path: &Path) -> Box<dyn NativeRunner> {
            panic!("no runner expected")
        }
    }

    fn registry(options: ShellOptions) -> (HandlerRegistry, broadcast::Receiver<()>) {
        let shell = Shell::spawn(Arc::new(Unresolved), Box::new(NoRunners), options);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        (
            HandlerRegistry::new(shell, Arc::new(ServerState::default()), shutdown_tx),
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn test_status_counts_shell_instance() {
        let (handlers, _rx) = registry(ShellOptions::default());
        let response = handlers
            .handle(&JsonRpcRequest::new("shell.status", Value::Null))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["instances"], 1);
        assert_eq!(result["connections_total"], 0);
    }

    #[tokio::test]
    async fn test_list_instances() {
        let (handlers, _rx) = registry(ShellOptions::default());
        let response = handlers
            .handle(&JsonRpcRequest::new("instances.list", Value::Null))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result[0]["identity"]["name"], "svc:shell");
    }

    #[tokio::test]
    async fn test_connect_validates_params() {
        let (handlers, _rx) = registry(ShellOptions::default());

        let missing = handlers
            .handle(&JsonRpcRequest::new("shell.connect", json!({})))
            .await;
        assert_eq!(missing.error.unwrap().code, codes::INVALID_PARAMS);

        let bad_name = handlers
            .handle(&JsonRpcRequest::new("shell.connect", json!({"name": "nocolon"})))
            .await;
        assert_eq!(bad_name.error.unwrap().code, codes::INVALID_PARAMS);

        let bad_user = handlers
            .handle(&JsonRpcRequest::new(
                "shell.connect",
                json!({"name": "svc:a", "user_id": "someone"}),
            ))
            .await;
        assert_eq!(bad_user.error.unwrap().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_connect_reports_rejection() {
        let (handlers, _rx) = registry(ShellOptions {
            unresolved_names: crate::config::UnresolvedNamePolicy::Reject,
            ..ShellOptions::default()
        });
        let response = handlers
            .handle(&JsonRpcRequest::new("shell.connect", json!({"name": "svc:missing"})))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, codes::INVALID_ARGUMENT);
        assert_eq!(error.data.unwrap()["result"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_connect_to_running_shell() {
        let (handlers, _rx) = registry(ShellOptions::default());
        let response = handlers
            .handle(&JsonRpcRequest::new("shell.connect", json!({"name": "svc:shell"})))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["result"], "SUCCEEDED");
        assert_eq!(result["instance_id"], 1);
    }

    #[tokio::test]
    async fn test_shutdown_signals_listener() {
        let (handlers, mut rx) = registry(ShellOptions::default());
        let response = handlers
            .handle(&JsonRpcRequest::new("server.shutdown", Value::Null))
            .await;
        assert!(response.error.is_none());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (handlers, _rx) = registry(ShellOptions::default());
        let response = handlers
            .handle(&JsonRpcRequest::new("shell.explode", Value::Null))
            .await;
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }
}
