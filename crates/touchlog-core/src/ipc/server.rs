//! IPC server over a Unix domain socket.
//!
//! Runs two background tasks: an accept loop that hands each connection
//! to its own task, and a bridge that feeds watcher events into the
//! incremental indexer. Both poll the shared done flag at least every
//! [`POLL_INTERVAL`], so [`Server::stop`] takes effect within that bound.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock, PoisonError};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use touchlog_config::{VaultConfig, VaultPaths};

use super::codec::JsonStream;
use super::types::*;
use crate::daemon::{PidFile, resolve_socket_path};
use crate::index::IncrementalIndexer;
use crate::query::{SearchQuery, execute_search};
use crate::watch::{Event, FileWatcher, Operation, WatchError};

/// Upper bound on how long any server loop goes without checking for
/// shutdown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay between acknowledging `Shutdown` and stopping, so the reply
/// reaches the client before the socket goes away.
const SHUTDOWN_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// Errors from constructing or starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to resolve vault path {path}: {source}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to prepare socket directory {path}: {source}")]
    SocketDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove stale socket file {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to bind IPC socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to restrict socket permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start watcher: {0}")]
    Watch(#[from] WatchError),

    #[error("server already started")]
    AlreadyStarted,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the server handle and its tasks.
struct Shared {
    vault_root: PathBuf,
    socket_path: PathBuf,
    pid_file: PidFile,
    indexer: OnceLock<Arc<IncrementalIndexer>>,
    watcher: FileWatcher,
    done_tx: watch::Sender<bool>,
    stop_once: Once,
}

impl Shared {
    fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Broadcast done exactly once and stop the watcher.
    fn stop(&self) {
        self.stop_once.call_once(|| {
            info!(socket = %self.socket_path.display(), "IPC server stopping");
            self.done_tx.send_replace(true);
        });
        self.watcher.stop();
    }
}

/// The daemon's IPC endpoint for one vault.
pub struct Server {
    shared: Arc<Shared>,
    listener: Mutex<Option<UnixListener>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Bind the vault's socket.
    ///
    /// Any file already at the socket path is removed first. Must be called
    /// from within a tokio runtime.
    pub fn new(vault: &Path, config: VaultConfig) -> Result<Self, ServerError> {
        let vault_root = std::path::absolute(vault).map_err(|source| ServerError::Resolve {
            path: vault.to_path_buf(),
            source,
        })?;
        let socket_path = resolve_socket_path(&vault_root);

        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ServerError::SocketDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "removed existing socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ServerError::RemoveStale {
                    path: socket_path,
                    source,
                });
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| ServerError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600)).map_err(
            |source| ServerError::Permissions {
                path: socket_path.clone(),
                source,
            },
        )?;
        info!(path = %socket_path.display(), "IPC server listening");

        let paths = VaultPaths::new(&vault_root);
        let debounce = Duration::from_millis(config.daemon.watch_debounce_ms);
        let (done_tx, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                watcher: FileWatcher::new(&vault_root, debounce),
                pid_file: PidFile::new(paths.pid_file, socket_path.clone()),
                vault_root,
                socket_path,
                indexer: OnceLock::new(),
                done_tx,
                stop_once: Once::new(),
            }),
            listener: Mutex::new(Some(listener)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.shared.socket_path
    }

    /// Start the watcher, the incremental indexer, and the background loops.
    pub fn start(&self) -> Result<(), ServerError> {
        let listener = lock(&self.listener)
            .take()
            .ok_or(ServerError::AlreadyStarted)?;
        let shared = &self.shared;

        shared.watcher.start()?;
        let indexer = Arc::new(IncrementalIndexer::new(&shared.vault_root));
        let _ = shared.indexer.set(Arc::clone(&indexer));

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(accept_loop(Arc::clone(shared), listener)));
        if let (Some(events), Some(errors)) = (shared.watcher.take_events(), shared.watcher.take_errors()) {
            tasks.push(tokio::spawn(event_bridge(
                Arc::clone(shared),
                indexer,
                events,
                errors,
            )));
        }
        Ok(())
    }

    /// Stop the server. Safe to call any number of times, concurrently with
    /// an IPC `Shutdown`. Returns once the listener is closed.
    pub async fn stop(&self) {
        self.shared.stop();
        drop(lock(&self.listener).take());

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "IPC server task failed");
            }
        }
    }

    /// Receiver that turns `true` once the server has been told to stop.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.shared.done_tx.subscribe()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: UnixListener) {
    while !shared.is_done() {
        match tokio::time::timeout(POLL_INTERVAL, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok((stream, _))) => {
                tokio::spawn(handle_connection(Arc::clone(&shared), stream));
            }
            Ok(Err(e)) => {
                if shared.is_done() {
                    break;
                }
                warn!(error = %e, "accept failed");
            }
        }
    }
    debug!("accept loop exited");
}

async fn handle_connection(shared: Arc<Shared>, stream: UnixStream) {
    let mut conn = JsonStream::new(stream);
    let mut done = shared.done_tx.subscribe();

    loop {
        let msg: Message = tokio::select! {
            read = conn.read() => match read {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "closing IPC connection");
                    break;
                }
            },
            changed = done.changed() => {
                if changed.is_err() || *done.borrow() {
                    break;
                }
                continue;
            }
        };

        let response = process_message(&shared, msg).await;
        if let Err(e) = conn.write(&response).await {
            debug!(error = %e, "failed to write IPC response");
            break;
        }
    }
}

async fn event_bridge(
    shared: Arc<Shared>,
    indexer: Arc<IncrementalIndexer>,
    mut events: mpsc::Receiver<Event>,
    mut errors: mpsc::Receiver<WatchError>,
) {
    let mut done = shared.done_tx.subscribe();
    let mut tick = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                match indexer.process_event(&event).await {
                    Ok(outcome) => debug!(path = %event.path.display(), ?outcome, "indexed"),
                    Err(e) => warn!(path = %event.path.display(), error = %e, "failed to index change"),
                }
            }
            Some(err) = errors.recv() => {
                warn!(error = %err, "watcher error");
            }
            changed = done.changed() => {
                if changed.is_err() || *done.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                if shared.is_done() {
                    break;
                }
            }
        }
    }
    debug!("event bridge exited");
}

async fn process_message(shared: &Arc<Shared>, msg: Message) -> Response {
    debug!(kind = %msg.kind, version = msg.version, "IPC request");
    match &msg.kind {
        MessageType::Status => handle_status(shared),
        MessageType::QueryExecute => handle_query(shared, &msg).await,
        MessageType::ReindexPaths => handle_reindex(shared, &msg).await,
        MessageType::Shutdown => handle_shutdown(shared),
        MessageType::Other(name) => Response::error(format!("unknown message type: {name}")),
    }
}

fn handle_status(shared: &Shared) -> Response {
    let (running, pid) = shared.pid_file.status();
    Response::ok_with(&StatusResponse { running, pid })
}

async fn handle_query(shared: &Shared, msg: &Message) -> Response {
    let req: QueryExecuteRequest = match msg.decode_payload() {
        Ok(req) => req,
        Err(e) => return Response::error(format!("invalid QueryExecute payload: {e}")),
    };
    let query = match SearchQuery::parse(&req.query) {
        Ok(q) => q,
        Err(e) => return Response::error(format!("invalid query: {e}")),
    };
    match execute_search(&shared.vault_root, &query).await {
        Ok(results) => Response::ok_with(&QueryExecuteResponse { results }),
        Err(e) => Response::error(format!("query failed: {e}")),
    }
}

async fn handle_reindex(shared: &Shared, msg: &Message) -> Response {
    let req: ReindexPathsRequest = match msg.decode_payload() {
        Ok(req) => req,
        Err(e) => return Response::error(format!("invalid ReindexPaths payload: {e}")),
    };
    let Some(indexer) = shared.indexer.get() else {
        return Response::error("incremental indexer not initialized");
    };

    let mut processed = 0;
    for path in &req.paths {
        let event = Event::new(path, Operation::Write);
        match indexer.process_event(&event).await {
            Ok(_) => processed += 1,
            Err(e) => warn!(path, error = %e, "reindex failed"),
        }
    }
    info!(requested = req.paths.len(), processed, "reindex complete");
    Response::ok_with(&ReindexPathsResponse { processed })
}

fn handle_shutdown(shared: &Arc<Shared>) -> Response {
    info!("shutdown requested via IPC");
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_FLUSH_DELAY).await;
        shared.stop();
    });
    Response::ok()
}
