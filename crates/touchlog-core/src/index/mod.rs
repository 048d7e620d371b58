//! The SQLite-backed note index: storage, full rebuilds, and incremental
//! updates from filesystem events.

/// Full two-pass rebuild into a temporary database.
pub mod builder;
/// Per-event incremental updates.
pub mod incremental;
/// `[[link]]` resolution against indexed notes.
pub mod links;
/// Schema and row-level storage operations.
pub mod store;

use std::path::PathBuf;

pub use builder::{IndexBuilder, RebuildStats};
pub use incremental::{EventOutcome, IncrementalIndexer};
pub use store::{INDEX_SCHEMA_VERSION, IndexStore};

/// Errors from index storage and indexing.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("index not found at {} (run 'touchlog index rebuild')", .0.display())]
    Missing(PathBuf),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode index data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("index schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("index schema version {0} requires a migration; run 'touchlog index rebuild'")]
    SchemaMigration(i64),

    #[error("indexing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
