//! Read-side index queries: the `key:value` note search language and the
//! stored diagnostics listing.

/// Parsed search queries.
pub mod ast;
/// Stored parse and link diagnostics.
pub mod diagnostics;
/// Search execution against the index.
pub mod search;

pub use ast::{SearchQuery, TagMatch};
pub use diagnostics::{DiagnosticFilter, DiagnosticRecord, list_diagnostics};
pub use search::{SearchResult, execute_search};

use crate::index::IndexError;

/// Errors from parsing or executing a search.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid query term {0:?}: expected key:value")]
    MissingColon(String),

    #[error("unknown query key {0:?} (expected type, state, tag, match, limit, or offset)")]
    UnknownKey(String),

    #[error("empty value for query key {0:?}")]
    EmptyValue(String),

    #[error("invalid number for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("invalid match mode {0:?} (expected any or all)")]
    InvalidMatch(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("search failed: {0}")]
    Database(#[from] sqlx::Error),
}
