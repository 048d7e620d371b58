use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use touchlog_config::VaultPaths;

use super::QueryError;
use crate::index::IndexStore;
use crate::model::{DiagnosticLevel, Span};

/// Which stored diagnostics to list. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticFilter {
    pub level: Option<DiagnosticLevel>,
    /// `type:key` or a bare `key`.
    pub node: Option<String>,
    pub code: Option<String>,
}

/// A stored diagnostic together with the note it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_key: Option<String>,
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub span: Span,
    pub created_at: String,
}

impl DiagnosticRecord {
    /// `type:key` of the owning note, or its id if the note row is gone.
    pub fn node_ref(&self) -> String {
        match (&self.node_type, &self.node_key) {
            (Some(t), Some(k)) => format!("{t}:{k}"),
            _ => self.node_id.clone(),
        }
    }
}

const SELECT_DIAGNOSTICS: &str = r#"
    SELECT d.node_id, d.level, d.code, d.message, d.span, d.created_at, n.type, n.key
    FROM diagnostics d
    LEFT JOIN nodes n ON n.id = d.node_id
    WHERE 1 = 1"#;

/// List diagnostics from the index of the vault at `vault_root`, most
/// severe first, then by note.
pub async fn list_diagnostics(
    vault_root: &Path,
    filter: &DiagnosticFilter,
) -> Result<Vec<DiagnosticRecord>, QueryError> {
    let paths = VaultPaths::new(vault_root);
    let store = IndexStore::open_existing(&paths.index_db).await?;
    let result = run(&store, filter).await;
    store.close().await;
    result
}

async fn run(
    store: &IndexStore,
    filter: &DiagnosticFilter,
) -> Result<Vec<DiagnosticRecord>, QueryError> {
    let mut qb = build_query(filter);
    let rows = qb.build().fetch_all(store.pool()).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let level: String = row.try_get("level")?;
        let level = level
            .parse::<DiagnosticLevel>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let span: String = row.try_get("span")?;

        records.push(DiagnosticRecord {
            node_id: row.try_get("node_id")?,
            node_type: row.try_get("type")?,
            node_key: row.try_get("key")?,
            level,
            code: row.try_get("code")?,
            message: row.try_get("message")?,
            span: serde_json::from_str(&span).unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        });
    }

    debug!(diagnostics = records.len(), "diagnostics listed");
    Ok(records)
}

fn build_query(filter: &DiagnosticFilter) -> QueryBuilder<'_, Sqlite> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_DIAGNOSTICS);

    if let Some(level) = filter.level {
        qb.push(" AND d.level = ");
        qb.push_bind(level.as_str());
    }
    if let Some(code) = &filter.code {
        qb.push(" AND d.code = ");
        qb.push_bind(code.as_str());
    }
    if let Some(node) = &filter.node {
        match node.split_once(':') {
            Some((type_name, key)) => {
                qb.push(" AND n.type = ");
                qb.push_bind(type_name);
                qb.push(" AND n.key = ");
                qb.push_bind(key);
            }
            None => {
                qb.push(" AND n.key = ");
                qb.push_bind(node.as_str());
            }
        }
    }

    qb.push(
        " ORDER BY CASE d.level WHEN 'error' THEN 0 WHEN 'warn' THEN 1 ELSE 2 END, n.type, n.key, d.code",
    );
    qb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use crate::index::links::{AMBIGUOUS_LINK, UNRESOLVED_LINK};
    use pretty_assertions::assert_eq;
    use touchlog_test_utils::TestVault;

    async fn vault_with_diagnostics() -> TestVault {
        let vault = TestVault::new().await;
        vault.write_note("note", "alpha", "n-alpha", "see [[ghost]] and [[shared]]");
        vault.write_note("note", "shared", "n-shared", "");
        vault.write_note("task", "shared", "t-shared", "");
        vault.write_note("task", "beta", "t-beta", "see [[note:missing]]");
        IndexBuilder::new(vault.root(), vault.config())
            .rebuild()
            .await
            .unwrap();
        vault
    }

    #[tokio::test]
    async fn test_lists_most_severe_first() {
        let vault = vault_with_diagnostics().await;
        let all = list_diagnostics(vault.root(), &DiagnosticFilter::default())
            .await
            .unwrap();

        let summary: Vec<(DiagnosticLevel, String, String)> = all
            .iter()
            .map(|d| (d.level, d.code.clone(), d.node_ref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (DiagnosticLevel::Error, AMBIGUOUS_LINK.to_string(), "note:alpha".to_string()),
                (DiagnosticLevel::Warn, UNRESOLVED_LINK.to_string(), "note:alpha".to_string()),
                (DiagnosticLevel::Warn, UNRESOLVED_LINK.to_string(), "task:beta".to_string()),
            ]
        );
        assert!(all[0].span.path.ends_with("alpha.Rmd"));
        assert!(all[0].span.end_byte > all[0].span.start_byte);
    }

    #[tokio::test]
    async fn test_filters() {
        let vault = vault_with_diagnostics().await;
        let list = |filter: DiagnosticFilter| {
            let root = vault.root().to_path_buf();
            async move { list_diagnostics(&root, &filter).await.unwrap() }
        };

        let errors = list(DiagnosticFilter {
            level: Some(DiagnosticLevel::Error),
            ..Default::default()
        })
        .await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, AMBIGUOUS_LINK);

        let beta = list(DiagnosticFilter {
            node: Some("task:beta".into()),
            ..Default::default()
        })
        .await;
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].node_id, "t-beta");

        let by_key = list(DiagnosticFilter {
            node: Some("alpha".into()),
            code: Some(UNRESOLVED_LINK.into()),
            ..Default::default()
        })
        .await;
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].node_type.as_deref(), Some("note"));

        let none = list(DiagnosticFilter {
            code: Some("NO_SUCH_CODE".into()),
            ..Default::default()
        })
        .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_missing_index_is_error() {
        let vault = TestVault::new().await;
        let result = list_diagnostics(vault.root(), &DiagnosticFilter::default()).await;
        assert!(matches!(result, Err(QueryError::Index(_))));
    }
}
