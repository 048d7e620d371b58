use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use touchlog_config::VaultPaths;

use super::{QueryError, SearchQuery, TagMatch};
use crate::index::IndexStore;

/// One matching note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub key: String,
    pub title: String,
    pub state: String,
    pub created: String,
    pub updated: String,
    pub path: String,
    pub tags: Vec<String>,
}

const SELECT_NODES: &str = r#"
    SELECT
        n.id, n.type, n.key, n.title, n.state, n.created, n.updated, n.path,
        json_group_array(t.tag) AS tags
    FROM nodes n
    LEFT JOIN tags t ON t.node_id = n.id
    WHERE 1 = 1"#;

/// Run `query` against the index of the vault at `vault_root`, ordered by
/// `(type, key)`.
pub async fn execute_search(
    vault_root: &Path,
    query: &SearchQuery,
) -> Result<Vec<SearchResult>, QueryError> {
    let paths = VaultPaths::new(vault_root);
    let store = IndexStore::open_existing(&paths.index_db).await?;
    let result = run(&store, query).await;
    store.close().await;
    result
}

async fn run(store: &IndexStore, query: &SearchQuery) -> Result<Vec<SearchResult>, QueryError> {
    let mut qb = build_query(query);
    let rows = qb.build().fetch_all(store.pool()).await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let tags_json: String = row.try_get("tags")?;
        let tags: Vec<Option<String>> = serde_json::from_str(&tags_json).unwrap_or_default();
        let mut tags: Vec<String> = tags.into_iter().flatten().collect();
        tags.sort();

        results.push(SearchResult {
            id: row.try_get("id")?,
            type_name: row.try_get("type")?,
            key: row.try_get("key")?,
            title: row.try_get("title")?,
            state: row.try_get("state")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
            path: row.try_get("path")?,
            tags,
        });
    }

    debug!(results = results.len(), "search executed");
    Ok(results)
}

fn build_query(query: &SearchQuery) -> QueryBuilder<'_, Sqlite> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_NODES);

    if !query.types.is_empty() {
        qb.push(" AND n.type IN (");
        let mut list = qb.separated(", ");
        for t in &query.types {
            list.push_bind(t.as_str());
        }
        list.push_unseparated(")");
    }

    if !query.states.is_empty() {
        qb.push(" AND n.state IN (");
        let mut list = qb.separated(", ");
        for s in &query.states {
            list.push_bind(s.as_str());
        }
        list.push_unseparated(")");
    }

    if !query.tags.is_empty() {
        match query.tag_match {
            TagMatch::Any => {
                qb.push(" AND EXISTS (SELECT 1 FROM tags ta WHERE ta.node_id = n.id AND ta.tag IN (");
            }
            TagMatch::All => {
                qb.push(
                    " AND (SELECT COUNT(DISTINCT ta.tag) FROM tags ta WHERE ta.node_id = n.id AND ta.tag IN (",
                );
            }
        }
        let mut list = qb.separated(", ");
        for tag in &query.tags {
            list.push_bind(tag.as_str());
        }
        list.push_unseparated("))");

        if query.tag_match == TagMatch::All {
            let mut distinct = query.tags.clone();
            distinct.sort();
            distinct.dedup();
            qb.push(" = ");
            qb.push_bind(distinct.len() as i64);
        }
    }

    qb.push(" GROUP BY n.id ORDER BY n.type, n.key");

    if query.limit.is_some() || query.offset > 0 {
        // SQLite needs a LIMIT for OFFSET; -1 means unbounded.
        qb.push(" LIMIT ");
        qb.push_bind(query.limit.map_or(-1, i64::from));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(query.offset));
    }

    qb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use pretty_assertions::assert_eq;
    use touchlog_test_utils::TestVault;

    async fn seeded_vault() -> TestVault {
        let vault = TestVault::new().await;
        vault.write_raw(
            "note/a.Rmd",
            "---\nid: n-a\ntype: note\nkey: a\ntitle: A\nstate: draft\ntags: [x, y]\n---\n",
        );
        vault.write_raw(
            "note/b.Rmd",
            "---\nid: n-b\ntype: note\nkey: b\ntitle: B\nstate: done\ntags: [y]\n---\n",
        );
        vault.write_raw(
            "task/c.Rmd",
            "---\nid: t-c\ntype: task\nkey: c\ntitle: C\nstate: draft\n---\n",
        );
        IndexBuilder::new(vault.root(), vault.config())
            .rebuild()
            .await
            .unwrap();
        vault
    }

    async fn keys(vault: &TestVault, q: &str) -> Vec<String> {
        let query = SearchQuery::parse(q).unwrap();
        execute_search(vault.root(), &query)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect()
    }

    #[tokio::test]
    async fn test_empty_query_returns_all_in_order() {
        let vault = seeded_vault().await;
        let results = execute_search(vault.root(), &SearchQuery::default()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "n-a");
        assert_eq!(results[0].tags, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(results[2].type_name, "task");
        assert!(results[2].tags.is_empty());
    }

    #[tokio::test]
    async fn test_filters() {
        let vault = seeded_vault().await;
        assert_eq!(keys(&vault, "type:task").await, vec!["c"]);
        assert_eq!(keys(&vault, "state:draft").await, vec!["a", "c"]);
        assert_eq!(keys(&vault, "tag:x,y").await, vec!["a"]);
        assert_eq!(keys(&vault, "tag:x,y match:any").await, vec!["a", "b"]);
        assert_eq!(keys(&vault, "tag:y tag:y").await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_limit_and_offset() {
        let vault = seeded_vault().await;
        assert_eq!(keys(&vault, "limit:2").await, vec!["a", "b"]);
        assert_eq!(keys(&vault, "offset:1").await, vec!["b", "c"]);
        assert_eq!(keys(&vault, "limit:1 offset:1").await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_missing_index_is_error() {
        let vault = TestVault::new().await;
        let result = execute_search(vault.root(), &SearchQuery::default()).await;
        assert!(matches!(result, Err(QueryError::Index(_))));
    }
}
