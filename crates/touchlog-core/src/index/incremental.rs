use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use touchlog_config::VaultPaths;

use super::IndexError;
use super::links::resolve_links;
use super::store::{self, FileFingerprint, IndexStore, NodeRecord};
use crate::note;
use crate::watch::{Event, Operation};

/// What processing a single event did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The note's node, tags, edges and diagnostics were written.
    Indexed,
    /// The stored fingerprint matched; nothing was written.
    Unchanged,
    /// The note has no complete `id`/`type`/`key` identity.
    Skipped,
    /// The node stored for the path was deleted.
    Removed,
    /// A remove for a path with no stored node.
    NotIndexed,
}

/// Applies filesystem events to the on-disk index, one at a time.
///
/// Each event opens its own short-lived connection and transaction, so
/// events from the watcher and from `ReindexPaths` requests may run
/// concurrently; SQLite's busy timeout serialises the writes.
#[derive(Debug, Clone)]
pub struct IncrementalIndexer {
    vault_root: PathBuf,
    db_path: PathBuf,
}

impl IncrementalIndexer {
    pub fn new(vault_root: &Path) -> Self {
        let paths = VaultPaths::new(vault_root);
        Self {
            vault_root: paths.root,
            db_path: paths.index_db,
        }
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// Apply one event. Relative paths are resolved against the vault root.
    pub async fn process_event(&self, event: &Event) -> Result<EventOutcome, IndexError> {
        let path = if event.path.is_absolute() {
            event.path.clone()
        } else {
            self.vault_root.join(&event.path)
        };
        trace!(path = %path.display(), op = ?event.operation, "processing event");

        let store = IndexStore::open(&self.db_path).await?;
        let result = match event.operation {
            Operation::Create | Operation::Write => self.update(&store, &path).await,
            Operation::Remove => self.remove(&store, &path).await,
            Operation::Rename => {
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    self.update(&store, &path).await
                } else {
                    self.remove(&store, &path).await
                }
            }
        };
        store.close().await;

        if let Ok(outcome) = &result {
            debug!(path = %path.display(), outcome = ?outcome, "event applied");
        }
        result
    }

    async fn update(&self, store: &IndexStore, path: &Path) -> Result<EventOutcome, IndexError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(IndexError::io(path, e)),
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IndexError::io(path, e))?;

        let parsed = note::parse(path, &content);
        if parsed.frontmatter.identity().is_none() {
            return Ok(EventOutcome::Skipped);
        }

        let node = NodeRecord::from_note(&parsed, FileFingerprint::from_metadata(&meta));
        let mut tx = store.begin().await?;

        if let Some((fingerprint, stored_path)) = store::node_fingerprint(&mut tx, &node.id).await?
            && fingerprint.mtime_ns == node.mtime_ns
            && fingerprint.size_bytes == node.size_bytes
            && stored_path == node.path
        {
            return Ok(EventOutcome::Unchanged);
        }

        // A different node previously stored at this path (its id changed).
        sqlx::query("DELETE FROM nodes WHERE path = ? AND id != ?")
            .bind(&node.path)
            .bind(&node.id)
            .execute(&mut *tx)
            .await?;

        store::upsert_node(&mut tx, &node).await?;
        store::replace_tags(&mut tx, &node.id, &parsed.frontmatter.tags).await?;

        let type_keys = store::load_type_key_map(&mut tx).await?;
        let (edges, link_diags) = resolve_links(&parsed.links, &type_keys);
        store::replace_edges(&mut tx, &node.id, &edges).await?;

        let mut diags = parsed.diagnostics;
        diags.extend(link_diags);
        store::replace_diagnostics(&mut tx, &node.id, &diags).await?;

        tx.commit().await?;
        Ok(EventOutcome::Indexed)
    }

    async fn remove(&self, store: &IndexStore, path: &Path) -> Result<EventOutcome, IndexError> {
        let mut tx = store.begin().await?;
        let removed = store::delete_node_by_path(&mut tx, &path.to_string_lossy()).await?;
        tx.commit().await?;
        Ok(if removed {
            EventOutcome::Removed
        } else {
            EventOutcome::NotIndexed
        })
    }
}
