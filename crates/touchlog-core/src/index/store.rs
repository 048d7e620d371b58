//! SQLite index storage.
//!
//! All writers take a `&mut SqliteConnection` so they run equally against a
//! plain connection or inside a transaction (`&mut *tx`).

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

use super::IndexError;
use super::links::ResolvedLink;
use crate::model::{Diagnostic, Note, TypeKey, format_timestamp};

/// Version of the index schema written by this build.
pub const INDEX_SCHEMA_VERSION: i64 = 1;

/// How long a writer waits for a competing writer's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        schema_version INTEGER PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        key TEXT NOT NULL,
        title TEXT NOT NULL,
        state TEXT NOT NULL,
        created TEXT NOT NULL,
        updated TEXT NOT NULL,
        path TEXT NOT NULL,
        mtime_ns INTEGER NOT NULL,
        size_bytes INTEGER NOT NULL,
        hash TEXT,
        UNIQUE(type, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        from_id TEXT NOT NULL,
        to_id TEXT,
        edge_type TEXT NOT NULL,
        raw_target TEXT NOT NULL,
        span TEXT NOT NULL,
        FOREIGN KEY(from_id) REFERENCES nodes(id) ON DELETE CASCADE,
        FOREIGN KEY(to_id) REFERENCES nodes(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        node_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY(node_id, tag),
        FOREIGN KEY(node_id) REFERENCES nodes(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS diagnostics (
        node_id TEXT NOT NULL,
        level TEXT NOT NULL,
        code TEXT NOT NULL,
        message TEXT NOT NULL,
        span TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(node_id) REFERENCES nodes(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_edges_from_id ON edges(from_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_to_id ON edges(to_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_edge_type ON edges(edge_type)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_state ON nodes(state)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path)",
    "CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag)",
    "CREATE INDEX IF NOT EXISTS idx_diagnostics_node_id ON diagnostics(node_id)",
    "CREATE INDEX IF NOT EXISTS idx_diagnostics_level ON diagnostics(level)",
];

/// Handle to an index database.
#[derive(Debug, Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    /// Open (creating if needed) the database at `db_path` and bring its
    /// schema up to date.
    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| IndexError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let store = Self::connect(db_path, true).await?;
        store.apply_schema().await?;
        Ok(store)
    }

    /// Open an existing database read-write without creating it.
    pub async fn open_existing(db_path: &Path) -> Result<Self, IndexError> {
        if !tokio::fs::try_exists(db_path).await.unwrap_or(false) {
            return Err(IndexError::Missing(db_path.to_path_buf()));
        }
        let store = Self::connect(db_path, false).await?;
        store.apply_schema().await?;
        Ok(store)
    }

    async fn connect(db_path: &Path, create: bool) -> Result<Self, IndexError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(create)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .journal_mode(SqliteJournalMode::Delete);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, IndexError> {
        Ok(self.pool.begin().await?)
    }

    /// Close all connections, flushing the database file.
    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn apply_schema(&self) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;

        match schema_version(&mut *tx).await? {
            0 => {
                for statement in SCHEMA_V1 {
                    sqlx::query(statement).execute(&mut *tx).await?;
                }
                let now = chrono::Utc::now().to_rfc3339();
                sqlx::query(
                    "INSERT INTO meta (schema_version, created_at, updated_at) VALUES (?, ?, ?)",
                )
                .bind(INDEX_SCHEMA_VERSION)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                debug!(version = INDEX_SCHEMA_VERSION, "created index schema");
            }
            INDEX_SCHEMA_VERSION => {}
            found if found > INDEX_SCHEMA_VERSION => {
                return Err(IndexError::SchemaTooNew {
                    found,
                    supported: INDEX_SCHEMA_VERSION,
                });
            }
            found => return Err(IndexError::SchemaMigration(found)),
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Current schema version, or 0 for an empty database.
pub async fn schema_version(conn: &mut SqliteConnection) -> Result<i64, IndexError> {
    let has_meta: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
    )
    .fetch_one(&mut *conn)
    .await?;
    if has_meta == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(schema_version) FROM meta")
        .fetch_one(&mut *conn)
        .await?;
    Ok(version.unwrap_or(0))
}

/// A node row ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub type_name: String,
    pub key: String,
    pub title: String,
    pub state: String,
    pub created: String,
    pub updated: String,
    pub path: String,
    pub mtime_ns: i64,
    pub size_bytes: i64,
}

impl NodeRecord {
    pub fn from_note(note: &Note, fingerprint: FileFingerprint) -> Self {
        let fm = &note.frontmatter;
        Self {
            id: fm.id.clone(),
            type_name: fm.type_name.clone(),
            key: fm.key.clone(),
            title: fm.title.clone(),
            state: fm.state.clone(),
            created: format_timestamp(fm.created),
            updated: format_timestamp(fm.updated),
            path: note.path.to_string_lossy().into_owned(),
            mtime_ns: fingerprint.mtime_ns,
            size_bytes: fingerprint.size_bytes,
        }
    }
}

/// Modification time and size used to detect unchanged files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub mtime_ns: i64,
    pub size_bytes: i64,
}

impl FileFingerprint {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            mtime_ns,
            size_bytes: i64::try_from(meta.len()).unwrap_or(i64::MAX),
        }
    }
}

pub async fn upsert_node(conn: &mut SqliteConnection, node: &NodeRecord) -> Result<(), IndexError> {
    sqlx::query(
        r#"
        INSERT INTO nodes (id, type, key, title, state, created, updated, path, mtime_ns, size_bytes, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT(id) DO UPDATE SET
            type = excluded.type,
            key = excluded.key,
            title = excluded.title,
            state = excluded.state,
            created = excluded.created,
            updated = excluded.updated,
            path = excluded.path,
            mtime_ns = excluded.mtime_ns,
            size_bytes = excluded.size_bytes,
            hash = excluded.hash
        "#,
    )
    .bind(&node.id)
    .bind(&node.type_name)
    .bind(&node.key)
    .bind(&node.title)
    .bind(&node.state)
    .bind(&node.created)
    .bind(&node.updated)
    .bind(&node.path)
    .bind(node.mtime_ns)
    .bind(node.size_bytes)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn replace_tags(
    conn: &mut SqliteConnection,
    node_id: &str,
    tags: &[String],
) -> Result<(), IndexError> {
    sqlx::query("DELETE FROM tags WHERE node_id = ?")
        .bind(node_id)
        .execute(&mut *conn)
        .await?;
    for tag in tags {
        sqlx::query("INSERT OR IGNORE INTO tags (node_id, tag) VALUES (?, ?)")
            .bind(node_id)
            .bind(tag)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn replace_edges(
    conn: &mut SqliteConnection,
    from_id: &str,
    edges: &[ResolvedLink],
) -> Result<(), IndexError> {
    sqlx::query("DELETE FROM edges WHERE from_id = ?")
        .bind(from_id)
        .execute(&mut *conn)
        .await?;
    for edge in edges {
        let raw_target = serde_json::to_string(&edge.link.target)?;
        let span = serde_json::to_string(&edge.link.span)?;
        sqlx::query(
            "INSERT INTO edges (from_id, to_id, edge_type, raw_target, span) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(from_id)
        .bind(edge.to_id.as_deref())
        .bind(&edge.link.edge_type)
        .bind(raw_target)
        .bind(span)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn replace_diagnostics(
    conn: &mut SqliteConnection,
    node_id: &str,
    diagnostics: &[Diagnostic],
) -> Result<(), IndexError> {
    sqlx::query("DELETE FROM diagnostics WHERE node_id = ?")
        .bind(node_id)
        .execute(&mut *conn)
        .await?;
    let now = chrono::Utc::now().to_rfc3339();
    for diag in diagnostics {
        let span = serde_json::to_string(&diag.span)?;
        sqlx::query(
            "INSERT INTO diagnostics (node_id, level, code, message, span, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(node_id)
        .bind(diag.level.as_str())
        .bind(&diag.code)
        .bind(&diag.message)
        .bind(span)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Stored `(fingerprint, path)` of a node, if present.
pub async fn node_fingerprint(
    conn: &mut SqliteConnection,
    node_id: &str,
) -> Result<Option<(FileFingerprint, String)>, IndexError> {
    let row = sqlx::query("SELECT mtime_ns, size_bytes, path FROM nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|row| {
        (
            FileFingerprint {
                mtime_ns: row.get("mtime_ns"),
                size_bytes: row.get("size_bytes"),
            },
            row.get("path"),
        )
    }))
}

/// Delete the node stored for `path`. Returns whether a node was removed.
pub async fn delete_node_by_path(
    conn: &mut SqliteConnection,
    path: &str,
) -> Result<bool, IndexError> {
    let result = sqlx::query("DELETE FROM nodes WHERE path = ?")
        .bind(path)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Map of every indexed `(type, key)` to its node id.
pub async fn load_type_key_map(
    conn: &mut SqliteConnection,
) -> Result<HashMap<TypeKey, String>, IndexError> {
    let rows = sqlx::query("SELECT id, type, key FROM nodes")
        .fetch_all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                TypeKey::new(row.get::<String, _>("type"), row.get::<String, _>("key")),
                row.get("id"),
            )
        })
        .collect())
}

pub async fn count_nodes(conn: &mut SqliteConnection) -> Result<i64, IndexError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
        .fetch_one(conn)
        .await?)
}
