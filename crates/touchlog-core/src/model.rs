//! Parsed note types shared by the parser, the index store, and the indexers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use touchlog_config::DEFAULT_EDGE_TYPE;

/// A qualified note reference (`type:key`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey {
    pub type_name: String,
    pub key: String,
}

impl TypeKey {
    pub fn new(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.key)
    }
}

/// YAML frontmatter of a note. Missing fields are left empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    pub id: String,
    pub type_name: String,
    pub key: String,
    pub title: String,
    pub state: String,
    pub tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Fields not recognised above, preserved as-is.
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Frontmatter {
    /// The note's `(type, key)` identity, if `id`, `type` and `key` are all set.
    pub fn identity(&self) -> Option<TypeKey> {
        if self.id.is_empty() || self.type_name.is_empty() || self.key.is_empty() {
            None
        } else {
            Some(TypeKey::new(&self.type_name, &self.key))
        }
    }
}

/// A parsed note file.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: PathBuf,
    pub frontmatter: Frontmatter,
    pub body: String,
    pub links: Vec<RawLink>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A wiki link as written in a note body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLink {
    pub target: LinkTarget,
    pub edge_type: String,
    pub span: Span,
}

/// Link target; `type_name` is `None` for unqualified `[[key]]` links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub key: String,
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(t) => write!(f, "{t}:{}", self.key),
            None => f.write_str(&self.key),
        }
    }
}

/// Byte range in a note file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub path: String,
    pub start_byte: usize,
    pub end_byte: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

impl DiagnosticLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid diagnostic level {0:?} (expected info, warn, or error)")]
pub struct ParseLevelError(String);

impl FromStr for DiagnosticLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// A parse or link-resolution problem attached to a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, code: &str, message: String, span: Span) -> Self {
        Self {
            level,
            code: code.to_string(),
            message,
            span,
        }
    }
}

/// Format an optional timestamp the way the index stores it (RFC 3339, UTC,
/// whole seconds); missing timestamps are stored as the empty string.
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
