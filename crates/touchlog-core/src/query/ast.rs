use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::QueryError;

/// How tag filters combine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// A note must carry every listed tag.
    #[default]
    All,
    /// A note must carry at least one listed tag.
    Any,
}

/// A parsed search query. The default value matches every note.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub types: Vec<String>,
    pub states: Vec<String>,
    pub tags: Vec<String>,
    pub tag_match: TagMatch,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl SearchQuery {
    /// Parse whitespace-separated `key:value` terms.
    ///
    /// `type`, `state` and `tag` take comma-separated lists and accumulate
    /// when repeated; `match` is `any` or `all`; `limit` and `offset` are
    /// non-negative integers (`limit:0` means no limit).
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let mut query = SearchQuery::default();

        for term in input.split_whitespace() {
            let (key, value) = term
                .split_once(':')
                .ok_or_else(|| QueryError::MissingColon(term.to_string()))?;
            if value.is_empty() {
                return Err(QueryError::EmptyValue(key.to_string()));
            }

            match key {
                "type" => query.types.extend(csv(key, value)?),
                "state" => query.states.extend(csv(key, value)?),
                "tag" => query.tags.extend(csv(key, value)?),
                "match" => {
                    query.tag_match = match value {
                        "any" => TagMatch::Any,
                        "all" => TagMatch::All,
                        other => return Err(QueryError::InvalidMatch(other.to_string())),
                    };
                }
                "limit" => query.limit = Some(number(key, value)?).filter(|n| *n > 0),
                "offset" => query.offset = number(key, value)?,
                other => return Err(QueryError::UnknownKey(other.to_string())),
            }
        }

        Ok(query)
    }
}

impl FromStr for SearchQuery {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn csv(key: &str, value: &str) -> Result<Vec<String>, QueryError> {
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(QueryError::EmptyValue(key.to_string()));
    }
    Ok(items)
}

fn number(key: &str, value: &str) -> Result<u32, QueryError> {
    value.parse().map_err(|_| QueryError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}
