//! Link resolution shared by the full builder and the incremental indexer.

use std::collections::HashMap;

use crate::model::{Diagnostic, DiagnosticLevel, RawLink, TypeKey};

pub const UNRESOLVED_LINK: &str = "UNRESOLVED_LINK";
pub const AMBIGUOUS_LINK: &str = "AMBIGUOUS_LINK";

/// A link with its target node id, when the target could be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub link: RawLink,
    pub to_id: Option<String>,
}

/// Resolve `links` against the `(type, key) -> id` map.
///
/// Every link yields an edge; unresolved and ambiguous targets keep
/// `to_id = None` and add a diagnostic.
pub fn resolve_links(
    links: &[RawLink],
    type_keys: &HashMap<TypeKey, String>,
) -> (Vec<ResolvedLink>, Vec<Diagnostic>) {
    let mut resolved = Vec::with_capacity(links.len());
    let mut diagnostics = Vec::new();

    for link in links {
        let to_id = match &link.target.type_name {
            Some(type_name) => {
                let id = type_keys.get(&TypeKey::new(type_name, &link.target.key)).cloned();
                if id.is_none() {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticLevel::Warn,
                        UNRESOLVED_LINK,
                        format!(
                            "link target '{}' not found; run 'touchlog index rebuild' if it was just created",
                            link.target
                        ),
                        link.span.clone(),
                    ));
                }
                id
            }
            None => {
                let mut matches: Vec<(&TypeKey, &String)> = type_keys
                    .iter()
                    .filter(|(tk, _)| tk.key == link.target.key)
                    .collect();
                matches.sort();

                match matches.as_slice() {
                    [] => {
                        diagnostics.push(Diagnostic::new(
                            DiagnosticLevel::Warn,
                            UNRESOLVED_LINK,
                            format!(
                                "link target '{}' not found; use a qualified link (type:key) or rebuild the index",
                                link.target.key
                            ),
                            link.span.clone(),
                        ));
                        None
                    }
                    [(_, id)] => Some((*id).clone()),
                    many => {
                        let types: Vec<&str> =
                            many.iter().map(|(tk, _)| tk.type_name.as_str()).collect();
                        diagnostics.push(Diagnostic::new(
                            DiagnosticLevel::Error,
                            AMBIGUOUS_LINK,
                            format!(
                                "link target '{}' is ambiguous, it matches {} types: {}; use a qualified link (type:key)",
                                link.target.key,
                                many.len(),
                                types.join(", ")
                            ),
                            link.span.clone(),
                        ));
                        None
                    }
                }
            }
        };

        resolved.push(ResolvedLink {
            link: link.clone(),
            to_id,
        });
    }

    (resolved, diagnostics)
}
