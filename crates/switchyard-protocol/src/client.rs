use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{JsonRpcRequest, JsonRpcResponse};

/// Default control socket path (`~/.switchyard/switchyard.sock`)
pub fn default_socket_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".switchyard").join("switchyard.sock"))
}

/// Line-oriented JSON-RPC client for the broker's control socket
pub struct SocketClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl SocketClient {
    pub async fn connect() -> Result<Self, std::io::Error> {
        let Some(path) = default_socket_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "home directory unavailable",
            ));
        };
        Self::connect_to(path).await
    }

    pub async fn connect_to(path: PathBuf) -> Result<Self, std::io::Error> {
        let stream = UnixStream::connect(&path).await.map_err(|err| {
            std::io::Error::new(
                err.kind(),
                format!(
                    "could not connect to switchyard socket at {} (is the broker running?): {}",
                    path.display(),
                    err
                ),
            )
        })?;
        let (r, w) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
        })
    }

    pub async fn call(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, std::io::Error> {
        let payload = serde_json::to_string(&request)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        self.writer.write_all(payload.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "socket closed while waiting for response",
            ));
        }

        let response: JsonRpcResponse = serde_json::from_str(line.trim())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(response)
    }
}
