//! Note file parser.
//!
//! A note is a `.Rmd` file that starts with a YAML frontmatter block fenced
//! by `---` lines, followed by a free-form body containing wiki links:
//!
//! - `[[key]]`: unqualified, resolved by key across all types
//! - `[[type:key]]`: qualified
//! - `[[type:key|edge-type]]`: qualified with an explicit edge type
//!
//! Parsing never fails. Structural problems are reported as diagnostics on
//! the returned [`Note`].

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_yaml::Value;

use crate::model::{
    DEFAULT_EDGE_TYPE, Diagnostic, DiagnosticLevel, Frontmatter, LinkTarget, Note, RawLink, Span,
};

pub const FRONTMATTER_MISSING: &str = "FRONTMATTER_MISSING";
pub const FRONTMATTER_PARSE_ERROR: &str = "FRONTMATTER_PARSE_ERROR";

/// File extension of note files.
pub const NOTE_EXTENSION: &str = "Rmd";

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("link pattern is a valid regex"));

const FENCE: &str = "---";

/// Whether `path` names a note file.
pub fn is_note_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == NOTE_EXTENSION)
}

/// Parse a note's content. `path` is recorded on the note and in spans.
pub fn parse(path: &Path, content: &str) -> Note {
    let span_path = path.to_string_lossy().into_owned();
    let mut note = Note {
        path: path.to_path_buf(),
        frontmatter: Frontmatter::default(),
        body: String::new(),
        links: Vec::new(),
        diagnostics: Vec::new(),
    };

    let fence = match find_frontmatter(content) {
        Ok(fence) => fence,
        Err(reason) => {
            note.diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                FRONTMATTER_MISSING,
                format!("frontmatter is missing or invalid: {reason}; notes must start with '---'"),
                Span {
                    path: span_path,
                    ..Span::default()
                },
            ));
            note.body = content.to_string();
            return note;
        }
    };

    let yaml = &content[fence.inner_start..fence.inner_end];
    if let Err(e) = parse_frontmatter(yaml, &mut note.frontmatter) {
        note.diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            FRONTMATTER_PARSE_ERROR,
            format!("failed to parse YAML frontmatter: {e}"),
            Span {
                path: span_path.clone(),
                start_byte: fence.inner_start,
                end_byte: fence.inner_end,
            },
        ));
    }

    let mut body_start = fence.end;
    if content[body_start..].starts_with('\n') {
        body_start += 1;
    }
    note.body = content[body_start..].to_string();
    note.links = extract_links(&span_path, &note.body, body_start);
    note
}

/// Byte offsets of a frontmatter block.
struct Fence {
    inner_start: usize,
    inner_end: usize,
    /// Offset just past the closing `---`.
    end: usize,
}

fn find_frontmatter(content: &str) -> Result<Fence, &'static str> {
    if !content.starts_with(FENCE) {
        return Err("'---' must start at byte 0");
    }

    let mut inner_start = FENCE.len();
    if content[inner_start..].starts_with('\n') {
        inner_start += 1;
    }

    let mut line_start = inner_start;
    for line in content[inner_start..].split_inclusive('\n') {
        if line.starts_with(FENCE) {
            return Ok(Fence {
                inner_start,
                inner_end: line_start,
                end: line_start + FENCE.len(),
            });
        }
        line_start += line.len();
    }

    Err("closing '---' not found")
}

fn parse_frontmatter(yaml: &str, fm: &mut Frontmatter) -> Result<(), serde_yaml::Error> {
    let mapping = match serde_yaml::from_str::<Value>(yaml)? {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Ok(()),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected a mapping, found {}",
                value_kind(&other)
            )));
        }
    };

    for (k, v) in mapping {
        let Some(name) = k.as_str() else {
            continue;
        };
        match name {
            "id" => fm.id = string_field(&v),
            "type" => fm.type_name = string_field(&v),
            "key" => fm.key = string_field(&v),
            "title" => fm.title = string_field(&v),
            "state" => fm.state = string_field(&v),
            "created" => fm.created = timestamp_field(&v),
            "updated" => fm.updated = timestamp_field(&v),
            "tags" => {
                fm.tags = v
                    .as_sequence()
                    .map(|seq| {
                        seq.iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
            }
            _ => {
                fm.extra.insert(name.to_string(), v);
            }
        }
    }
    Ok(())
}

fn string_field(v: &Value) -> String {
    v.as_str().map(str::to_string).unwrap_or_default()
}

fn timestamp_field(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn extract_links(path: &str, body: &str, body_offset: usize) -> Vec<RawLink> {
    LINK_PATTERN
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?;
            parse_link(
                inner.as_str(),
                Span {
                    path: path.to_string(),
                    start_byte: body_offset + whole.start(),
                    end_byte: body_offset + whole.end(),
                },
            )
        })
        .collect()
}

/// Parse the text between `[[` and `]]`. Returns `None` for links with an
/// empty type or key.
fn parse_link(content: &str, span: Span) -> Option<RawLink> {
    let (target, edge_type) = match content.split('|').collect::<Vec<_>>().as_slice() {
        [target, edge] => (*target, edge.trim().to_string()),
        _ => (content, DEFAULT_EDGE_TYPE.to_string()),
    };

    let target = match target.split_once(':') {
        Some((type_name, key)) => {
            let (type_name, key) = (type_name.trim(), key.trim());
            if type_name.is_empty() || key.is_empty() {
                return None;
            }
            LinkTarget {
                type_name: Some(type_name.to_string()),
                key: key.to_string(),
            }
        }
        None => {
            let key = target.trim();
            if key.is_empty() {
                return None;
            }
            LinkTarget {
                type_name: None,
                key: key.to_string(),
            }
        }
    };

    Some(RawLink {
        target,
        edge_type,
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NOTE: &str = "---\nid: n1\ntype: note\nkey: alpha\ntitle: Alpha\nstate: draft\ntags: [a, b]\ncreated: 2024-01-02T03:04:05Z\nowner: me\n---\nSee [[beta]] and [[task:gamma|blocks]].\n";

    #[test]
    fn test_parse_frontmatter_fields() {
        let note = parse(Path::new("note/alpha.Rmd"), NOTE);
        assert!(note.diagnostics.is_empty(), "{:?}", note.diagnostics);

        let fm = &note.frontmatter;
        assert_eq!(fm.id, "n1");
        assert_eq!(fm.type_name, "note");
        assert_eq!(fm.key, "alpha");
        assert_eq!(fm.title, "Alpha");
        assert_eq!(fm.tags, vec!["a".to_string(), "b".to_string()]);
        assert!(fm.created.is_some());
        assert!(fm.updated.is_none());
        assert!(fm.extra.contains_key("owner"));
        assert_eq!(note.body, "See [[beta]] and [[task:gamma|blocks]].\n");
    }

    #[test]
    fn test_extract_links_with_spans() {
        let note = parse(Path::new("n.Rmd"), NOTE);
        assert_eq!(note.links.len(), 2);

        let first = &note.links[0];
        assert_eq!(first.target.type_name, None);
        assert_eq!(first.target.key, "beta");
        assert_eq!(first.edge_type, DEFAULT_EDGE_TYPE);
        assert_eq!(
            &NOTE[first.span.start_byte..first.span.end_byte],
            "[[beta]]"
        );

        let second = &note.links[1];
        assert_eq!(second.target.type_name.as_deref(), Some("task"));
        assert_eq!(second.target.key, "gamma");
        assert_eq!(second.edge_type, "blocks");
    }

    #[test]
    fn test_empty_link_parts_are_dropped() {
        let note = parse(Path::new("n.Rmd"), "---\nid: x\n---\n[[:k]] [[t:]] [[ ]] [[ok]]");
        assert_eq!(note.links.len(), 1);
        assert_eq!(note.links[0].target.key, "ok");
    }

    #[test]
    fn test_missing_frontmatter_diagnostic() {
        let note = parse(Path::new("n.Rmd"), "just text [[k]]");
        assert_eq!(note.diagnostics.len(), 1);
        assert_eq!(note.diagnostics[0].code, FRONTMATTER_MISSING);
        assert_eq!(note.body, "just text [[k]]");
        assert!(note.links.is_empty());
    }

    #[test]
    fn test_unclosed_frontmatter_diagnostic() {
        let note = parse(Path::new("n.Rmd"), "---\nid: x\n");
        assert_eq!(note.diagnostics[0].code, FRONTMATTER_MISSING);
    }

    #[test]
    fn test_invalid_yaml_diagnostic() {
        let note = parse(Path::new("n.Rmd"), "---\nid: [unclosed\n---\nbody");
        assert_eq!(note.diagnostics.len(), 1);
        assert_eq!(note.diagnostics[0].code, FRONTMATTER_PARSE_ERROR);
        assert_eq!(note.body, "body");
    }

    #[test]
    fn test_empty_frontmatter_is_valid() {
        let note = parse(Path::new("n.Rmd"), "---\n---\nbody");
        assert!(note.diagnostics.is_empty());
        assert_eq!(note.frontmatter.identity(), None);
    }

    #[test]
    fn test_is_note_path() {
        assert!(is_note_path(Path::new("a/b.Rmd")));
        assert!(!is_note_path(Path::new("a/b.md")));
        assert!(!is_note_path(Path::new("a/Rmd")));
    }
}
