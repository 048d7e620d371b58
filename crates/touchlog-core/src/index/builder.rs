use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use touchlog_config::{VaultConfig, VaultPaths};

use super::IndexError;
use super::links::resolve_links;
use super::store::{self, FileFingerprint, IndexStore, NodeRecord};
use crate::model::{Note, TypeKey};
use crate::note;

/// Counts reported by a full rebuild.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    /// Note files discovered under type directories.
    pub files: usize,
    /// Notes written to the index.
    pub notes: usize,
    /// Files skipped: unreadable, missing identity, or duplicate `(type, key)`.
    pub skipped: usize,
    pub edges: usize,
    pub unresolved_edges: usize,
    pub diagnostics: usize,
}

/// Builds the index from scratch.
///
/// The new index is written to `index.db.tmp` and renamed over `index.db`
/// only once complete, so readers never observe a half-built index.
pub struct IndexBuilder<'a> {
    paths: VaultPaths,
    config: &'a VaultConfig,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(vault_root: &Path, config: &'a VaultConfig) -> Self {
        Self {
            paths: VaultPaths::new(vault_root),
            config,
        }
    }

    pub async fn rebuild(&self) -> Result<RebuildStats, IndexError> {
        let tmp = &self.paths.index_db_tmp;
        tokio::fs::create_dir_all(&self.paths.meta_dir)
            .await
            .map_err(|e| IndexError::io(&self.paths.meta_dir, e))?;
        match tokio::fs::remove_file(tmp).await {
            Ok(()) => debug!(path = %tmp.display(), "removed leftover temp index"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::io(tmp, e)),
        }

        let store = IndexStore::open(tmp).await?;
        let result = self.index_all(&store).await;
        store.close().await;
        let stats = result?;

        tokio::fs::rename(tmp, &self.paths.index_db)
            .await
            .map_err(|e| IndexError::io(&self.paths.index_db, e))?;

        info!(
            notes = stats.notes,
            edges = stats.edges,
            skipped = stats.skipped,
            "index rebuilt"
        );
        Ok(stats)
    }

    async fn index_all(&self, store: &IndexStore) -> Result<RebuildStats, IndexError> {
        let files = self.discover_notes().await?;
        let mut stats = RebuildStats {
            files: files.len(),
            ..RebuildStats::default()
        };

        let mut tx = store.begin().await?;

        // Pass 1: nodes, tags, and parse diagnostics.
        let mut type_keys: HashMap<TypeKey, String> = HashMap::new();
        let mut indexed: Vec<Note> = Vec::new();
        for path in files {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable note");
                    stats.skipped += 1;
                    continue;
                }
            };
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping note without metadata");
                    stats.skipped += 1;
                    continue;
                }
            };

            let parsed = note::parse(&path, &content);
            let Some(identity) = parsed.frontmatter.identity() else {
                debug!(path = %path.display(), "skipping note without id/type/key");
                stats.skipped += 1;
                continue;
            };
            if let Some(existing) = type_keys.get(&identity) {
                warn!(
                    path = %path.display(),
                    note = %identity,
                    existing_id = %existing,
                    "skipping duplicate type:key"
                );
                stats.skipped += 1;
                continue;
            }

            let node = NodeRecord::from_note(&parsed, FileFingerprint::from_metadata(&meta));
            store::upsert_node(&mut tx, &node).await?;
            store::replace_tags(&mut tx, &node.id, &parsed.frontmatter.tags).await?;

            type_keys.insert(identity, node.id);
            indexed.push(parsed);
        }

        // Pass 2: edges and link diagnostics, once every target is known.
        for parsed in &indexed {
            let id = &parsed.frontmatter.id;
            let (edges, link_diags) = resolve_links(&parsed.links, &type_keys);
            store::replace_edges(&mut tx, id, &edges).await?;

            let mut diags = parsed.diagnostics.clone();
            diags.extend(link_diags);
            store::replace_diagnostics(&mut tx, id, &diags).await?;

            stats.edges += edges.len();
            stats.unresolved_edges += edges.iter().filter(|e| e.to_id.is_none()).count();
            stats.diagnostics += diags.len();
        }
        stats.notes = indexed.len();

        tx.commit().await?;
        Ok(stats)
    }

    /// Every note file under `<vault>/<type>/` for the configured types, sorted.
    async fn discover_notes(&self) -> Result<Vec<PathBuf>, IndexError> {
        let type_dirs: Vec<PathBuf> = self
            .config
            .type_names()
            .map(|t| self.paths.root.join(t))
            .collect();

        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for dir in type_dirs.iter().filter(|d| d.is_dir()) {
                for entry in WalkDir::new(dir).follow_links(false) {
                    match entry {
                        Ok(entry) if entry.file_type().is_file() && note::is_note_path(entry.path()) => {
                            files.push(entry.into_path());
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "skipping unreadable directory entry"),
                    }
                }
            }
            files.sort();
            files
        })
        .await?;

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::links::{AMBIGUOUS_LINK, UNRESOLVED_LINK};
    use pretty_assertions::assert_eq;
    use touchlog_test_utils::TestVault;

    #[tokio::test]
    async fn test_rebuild_indexes_notes_and_edges() {
        let vault = TestVault::new().await;
        vault.write_note("note", "alpha", "n-alpha", "links to [[beta]] and [[task:gamma]]");
        vault.write_note("note", "beta", "n-beta", "back to [[note:alpha|refines]]");
        vault.write_note("task", "gamma", "t-gamma", "");

        let stats = IndexBuilder::new(vault.root(), vault.config()).rebuild().await.unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.notes, 3);
        assert_eq!(stats.edges, 3);
        assert_eq!(stats.unresolved_edges, 0);
        assert!(vault.paths().index_db.is_file());
        assert!(!vault.paths().index_db_tmp.exists());

        let store = IndexStore::open_existing(&vault.paths().index_db).await.unwrap();
        let resolved: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM edges WHERE to_id IS NOT NULL")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(resolved, 3);
        let edge_type: String =
            sqlx::query_scalar("SELECT edge_type FROM edges WHERE from_id = 'n-beta'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(edge_type, "refines");
    }

    #[tokio::test]
    async fn test_rebuild_records_link_diagnostics() {
        let vault = TestVault::new().await;
        vault.write_note("note", "shared", "n-shared", "");
        vault.write_note("task", "shared", "t-shared", "");
        vault.write_note("note", "src", "n-src", "[[shared]] [[missing]]");

        let stats = IndexBuilder::new(vault.root(), vault.config()).rebuild().await.unwrap();
        assert_eq!(stats.unresolved_edges, 2);

        let store = IndexStore::open_existing(&vault.paths().index_db).await.unwrap();
        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT code FROM diagnostics WHERE node_id = 'n-src' ORDER BY code",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(codes, vec![AMBIGUOUS_LINK.to_string(), UNRESOLVED_LINK.to_string()]);
    }

    #[tokio::test]
    async fn test_rebuild_skips_incomplete_and_duplicate_notes() {
        let vault = TestVault::new().await;
        vault.write_note("note", "alpha", "n-1", "");
        vault.write_raw("note/dup.Rmd", "---\nid: n-2\ntype: note\nkey: alpha\n---\n");
        vault.write_raw("note/nokey.Rmd", "---\nid: n-3\ntype: note\n---\n");
        vault.write_raw("note/ignored.md", "---\nid: n-4\ntype: note\nkey: x\n---\n");

        let stats = IndexBuilder::new(vault.root(), vault.config()).rebuild().await.unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.notes, 1);
        assert_eq!(stats.skipped, 2);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_index() {
        let vault = TestVault::new().await;
        vault.write_note("note", "alpha", "n-alpha", "");
        let builder = IndexBuilder::new(vault.root(), vault.config());
        builder.rebuild().await.unwrap();

        std::fs::remove_file(vault.root().join("note/alpha.Rmd")).unwrap();
        let stats = builder.rebuild().await.unwrap();
        assert_eq!(stats.notes, 0);
    }
}
