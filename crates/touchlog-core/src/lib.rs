#![deny(unsafe_code)]

//! touchlog core: the vault daemon and the note index it maintains.
//!
//! The daemon detaches from the terminal, keeps one instance per vault via a
//! PID file, serves a versioned JSON protocol on a Unix socket, and feeds
//! filesystem changes into the SQLite index. The CLI talks to it through
//! [`ipc::IpcClient`], or uses the index directly when no daemon runs.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Daemon lifecycle: detached launch, PID file, socket path, shutdown.
pub mod daemon;
/// SQLite note index: store, full rebuild, incremental updates.
pub mod index;
/// Unix socket protocol: wire types, framing, server, and client.
pub mod ipc;
/// File logging for the detached daemon.
pub mod logging;
/// Note, link, and diagnostic types.
pub mod model;
/// Frontmatter and wiki-link parser for `.Rmd` notes.
pub mod note;
/// Read-side index queries: note search and diagnostics listing.
pub mod query;
/// Debounced filesystem watcher.
pub mod watch;

pub use daemon::{Daemon, DaemonError};
pub use index::{IndexBuilder, IndexError, IncrementalIndexer};
pub use ipc::{IpcClient, Server};
pub use query::{SearchQuery, SearchResult, execute_search, list_diagnostics};
pub use watch::{Event, FileWatcher, Operation};
