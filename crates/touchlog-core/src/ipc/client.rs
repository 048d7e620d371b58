//! IPC client: connects to a vault's daemon over its Unix socket.

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tracing::debug;

use super::codec::{CodecError, JsonStream};
use super::types::*;
use crate::daemon::resolve_socket_path;
use crate::query::SearchResult;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("daemon closed the connection without responding")]
    Closed,

    #[error("daemon returned error: {0}")]
    DaemonError(String),
}

/// Client for one vault's daemon.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Client for the daemon serving the vault at `vault`.
    pub fn for_vault(vault: &Path) -> Self {
        Self::new(resolve_socket_path(vault))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether the socket file exists (the daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open a connection that can carry any number of requests.
    pub async fn connect(&self) -> Result<IpcConnection, IpcClientError> {
        if !self.daemon_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| IpcClientError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        Ok(IpcConnection {
            stream: JsonStream::new(stream),
        })
    }

    /// Send one message on a fresh connection.
    pub async fn send(&self, msg: &Message) -> Result<Response, IpcClientError> {
        self.connect().await?.request(msg).await
    }

    pub async fn status(&self) -> Result<StatusResponse, IpcClientError> {
        let resp = self.send(&Message::status()).await?;
        data(resp)
    }

    pub async fn query(&self, query: &str) -> Result<Vec<SearchResult>, IpcClientError> {
        let resp = self.send(&Message::query(query)?).await?;
        let reply: QueryExecuteResponse = data(resp)?;
        Ok(reply.results)
    }

    /// Ask the daemon to reindex `paths`; returns how many succeeded.
    pub async fn reindex(&self, paths: Vec<String>) -> Result<usize, IpcClientError> {
        let resp = self.send(&Message::reindex(paths)?).await?;
        let reply: ReindexPathsResponse = data(resp)?;
        Ok(reply.processed)
    }

    pub async fn shutdown(&self) -> Result<(), IpcClientError> {
        let resp = self.send(&Message::shutdown()).await?;
        success(resp).map(|_| ())
    }
}

/// An open connection. Responses arrive in request order.
pub struct IpcConnection {
    stream: JsonStream<UnixStream>,
}

impl IpcConnection {
    pub async fn request(&mut self, msg: &Message) -> Result<Response, IpcClientError> {
        debug!(kind = %msg.kind, "IPC request");
        self.stream.write(msg).await?;
        self.stream.read().await?.ok_or(IpcClientError::Closed)
    }
}

fn success(resp: Response) -> Result<Response, IpcClientError> {
    if resp.success {
        Ok(resp)
    } else {
        Err(IpcClientError::DaemonError(
            resp.error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

fn data<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, IpcClientError> {
    Ok(success(resp)?.decode_data()?)
}
