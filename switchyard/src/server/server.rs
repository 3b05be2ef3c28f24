//! Unix Socket Server
//!
//! Listens on the control socket and dispatches newline-delimited JSON-RPC 2.0
//! requests to the handler registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use switchyard_protocol::jsonrpc::parse_request;
use switchyard_protocol::JsonRpcResponse;

use super::handlers::HandlerRegistry;
use super::{ServerError, ServerState};
use crate::shell::ShellHandle;

/// Control server that listens on a Unix socket
pub struct ControlServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Handler registry for dispatching requests
    handlers: Arc<HandlerRegistry>,

    /// Shared state
    state: Arc<ServerState>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl ControlServer {
    pub fn new(socket_path: PathBuf, shell: ShellHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(ServerState::default());
        let handlers = Arc::new(HandlerRegistry::new(
            shell,
            Arc::clone(&state),
            shutdown_tx.clone(),
        ));

        Self {
            socket_path,
            handlers,
            state,
            shutdown_tx,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Serve until shutdown is signalled.
    pub async fn start(&self) -> Result<(), ServerError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(ServerError::InUse(self.socket_path.clone()));
            }
            debug!("Removing stale socket {:?}", self.socket_path);
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner-only: 0600
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!("Control server listening on {:?}", self.socket_path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handlers = Arc::clone(&self.handlers);
                            let state = Arc::clone(&self.state);

                            {
                                let mut count = state.connection_count.write().await;
                                *count += 1;
                            }
                            {
                                let mut active = state.active_connections.write().await;
                                *active += 1;
                            }

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handlers).await {
                                    error!("Connection error: {}", e);
                                }

                                let mut active = state.active_connections.write().await;
                                *active = active.saturating_sub(1);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Control server shutting down");
                    break;
                }
            }
        }

        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }

        Ok(())
    }
}

/// Handle a single connection
async fn handle_connection(stream: UnixStream, handlers: Arc<HandlerRegistry>) -> Result<(), ServerError> {
    let Ok(cred) = stream.peer_cred() else {
        warn!("Could not retrieve peer credentials, rejecting connection");
        return Ok(());
    };
    debug!("Connection from PID: {:?}, UID: {:?}", cred.pid(), cred.uid());

    #[cfg(unix)]
    {
        // SAFETY: getuid has no preconditions and cannot fail.
        let my_uid = unsafe { libc::getuid() };
        if cred.uid() != my_uid {
            warn!("Rejecting connection from UID {} (expected {})", cred.uid(), my_uid);
            return Ok(());
        }
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Client disconnected");
                break;
            }
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }

                let response = process_request(&line, &handlers).await;
                if response.is_null() {
                    continue;
                }

                let mut response_json = serde_json::to_string(&response)?;
                response_json.push('\n');
                if let Err(e) = writer.write_all(response_json.as_bytes()).await {
                    warn!("Failed to write response: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    warn!("Failed to flush: {}", e);
                    break;
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Process one request line. Returns `Null` when nothing should be written.
async fn process_request(line: &str, handlers: &HandlerRegistry) -> serde_json::Value {
    let requests = match parse_request(line) {
        Ok(requests) => requests,
        Err(error_response) => {
            return serde_json::to_value(error_response).unwrap_or_default();
        }
    };
    let is_batch = line.trim_start().starts_with('[');

    let mut responses: Vec<JsonRpcResponse> = Vec::new();
    for request in &requests {
        if let Err(e) = request.validate() {
            let id = request.id.clone().unwrap_or(serde_json::Value::Null);
            responses.push(JsonRpcResponse::invalid_request(id, e));
            continue;
        }

        let response = handlers.handle(request).await;
        if !request.is_notification() {
            responses.push(response);
        }
    }

    if is_batch {
        if responses.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::to_value(responses).unwrap_or_default()
        }
    } else {
        responses
            .pop()
            .and_then(|response| serde_json::to_value(response).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use switchyard_protocol::jsonrpc::codes;
    use switchyard_protocol::{JsonRpcRequest, SocketClient};
    use tokio::io::AsyncReadExt;

    use crate::resolver::{ResolvedName, Resolver};
    use crate::runner::{NativeRunner, NativeRunnerFactory};
    use crate::shell::{Shell, ShellOptions};

    struct Unresolved;

    #[async_trait]
    impl Resolver for Unresolved {
        async fn resolve_name(&self, name: &str) -> ResolvedName {
            ResolvedName::unresolved(name)
        }
    }

    struct NoRunners;

    impl NativeRunnerFactory for NoRunners {
        fn create(&self, _path: &std::path::Path) -> Box<dyn NativeRunner> {
            panic!("no runner expected")
        }
    }

    async fn start_server(dir: &tempfile::TempDir) -> (Arc<ControlServer>, tokio::task::JoinHandle<()>) {
        let shell = Shell::spawn(
            Arc::new(Unresolved),
            Box::new(NoRunners),
            ShellOptions::default(),
        );
        let server = Arc::new(ControlServer::new(dir.path().join("ctl.sock"), shell));
        let running = Arc::clone(&server);
        let task = tokio::spawn(async move {
            running.start().await.unwrap();
        });
        for _ in 0..100 {
            if server.socket_path().exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (server, task)
    }

    #[tokio::test]
    async fn test_status_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (server, task) = start_server(&dir).await;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(server.socket_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let mut client = SocketClient::connect_to(server.socket_path().to_path_buf())
            .await
            .unwrap();
        let response = client
            .call(JsonRpcRequest::new("shell.status", Value::Null))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["status"], "running");
        assert_eq!(result["connections_total"], 1);
        assert_eq!(result["connections_active"], 1);

        server.shutdown();
        task.await.unwrap();
        assert!(!server.socket_path().exists());
    }

    #[tokio::test]
    async fn test_batch_skips_notifications_and_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (server, task) = start_server(&dir).await;

        let stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let batch = json!([
            {"jsonrpc": "2.0", "id": 1, "method": "instances.list"},
            {"jsonrpc": "2.0", "method": "shell.status"},
            {"jsonrpc": "2.0", "id": 2, "method": "no.such"}
        ]);
        writer
            .write_all(format!("{}\n", batch).as_bytes())
            .await
            .unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let responses: Vec<JsonRpcResponse> = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, json!(1));
        assert!(responses[0].result.is_some());
        assert_eq!(responses[1].error.as_ref().unwrap().code, codes::METHOD_NOT_FOUND);

        writer.write_all(b"{not json\n").await.unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response.error.unwrap().code, codes::PARSE_ERROR);

        // A lone notification gets no reply; the connection stays usable.
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"shell.status\"}\n")
            .await
            .unwrap();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"instances.list\"}\n")
            .await
            .unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response.id, json!(7));

        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_method_stops_listener() {
        let dir = tempfile::tempdir().unwrap();
        let (server, task) = start_server(&dir).await;

        let mut client = SocketClient::connect_to(server.socket_path().to_path_buf())
            .await
            .unwrap();
        let response = client
            .call(JsonRpcRequest::new("server.shutdown", Value::Null))
            .await
            .unwrap();
        assert!(response.error.is_none());

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!server.socket_path().exists());
    }

    #[tokio::test]
    async fn test_refuses_socket_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let (server, task) = start_server(&dir).await;

        let shell = Shell::spawn(
            Arc::new(Unresolved),
            Box::new(NoRunners),
            ShellOptions::default(),
        );
        let second = ControlServer::new(server.socket_path().to_path_buf(), shell);
        assert!(matches!(second.start().await, Err(ServerError::InUse(_))));

        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let (server, task) = start_server(&dir).await;
        // The stale file already exists, so wait for the rebound listener.
        let mut stream = None;
        for _ in 0..100 {
            if let Ok(connected) = UnixStream::connect(server.socket_path()).await {
                stream = Some(connected);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut stream = stream.unwrap();
        stream
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"shell.status\"}\n")
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"{");

        server.shutdown();
        task.await.unwrap();
    }
}
