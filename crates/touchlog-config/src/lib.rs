#![deny(unsafe_code)]

//! Configuration loading and vault layout for touchlog.
//!
//! Loads the per-vault TOML configuration (`.touchlog/config.toml`) and
//! validates it. Provides the [`VaultConfig`] type as the central
//! configuration structure, and the [`vault`] module for locating,
//! validating, and initialising vault directories.

/// Vault directory layout, discovery, and initialisation.
pub mod vault;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use vault::VaultPaths;

/// Current configuration schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Edge type used when a link does not name one.
pub const DEFAULT_EDGE_TYPE: &str = "related-to";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("vault not initialized: {} does not exist (run 'touchlog init' first)", .0.display())]
    NotInitialized(PathBuf),

    #[error("vault already initialized at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("no vault found (no .touchlog/ directory found walking up from {})", .0.display())]
    VaultNotFound(PathBuf),

    #[error("unknown type bundle: {0}")]
    UnknownBundle(String),
}

/// Top-level vault configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Configuration schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Note types known to this vault, keyed by type name.
    #[serde(default)]
    pub types: BTreeMap<String, TypeDef>,

    /// Tag preferences.
    #[serde(default)]
    pub tags: TagConfig,

    /// Edge types known to this vault, keyed by edge name.
    #[serde(default)]
    pub edges: BTreeMap<String, EdgeDef>,

    /// Background daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            types: BTreeMap::new(),
            tags: TagConfig::default(),
            edges: BTreeMap::new(),
            daemon: DaemonConfig::default(),
        }
    }
}

fn default_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

/// A note type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// State assigned to new notes of this type.
    #[serde(default = "default_state")]
    pub default_state: String,

    /// Maximum length of a note key.
    #[serde(default = "default_key_max_len")]
    pub key_max_len: usize,
}

fn default_state() -> String {
    "draft".to_string()
}

fn default_key_max_len() -> usize {
    64
}

/// Tag preferences.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Tags suggested when creating notes.
    #[serde(default)]
    pub preferred: Vec<String>,
}

/// An edge type definition.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
    #[serde(default)]
    pub description: String,

    /// Source types allowed for this edge (empty = any).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_from: Vec<String>,

    /// Target types allowed for this edge (empty = any).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_to: Vec<String>,
}

/// Configuration for the background vault daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level filter for `daemon.log` (e.g. "info", "debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-path debounce window for filesystem events, in milliseconds.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_watch_debounce_ms() -> u64 {
    200
}

/// A predefined set of note types offered by `touchlog init`.
#[derive(Debug, Clone, Copy)]
pub struct TypeBundle {
    pub name: &'static str,
    pub description: &'static str,
    pub type_description: &'static str,
}

/// Built-in type bundles. Each bundle contributes one type of the same name.
pub const TYPE_BUNDLES: &[TypeBundle] = &[
    TypeBundle {
        name: "note",
        description: "Basic note-taking",
        type_description: "A general note",
    },
    TypeBundle {
        name: "log",
        description: "Journaling and logging",
        type_description: "A log entry",
    },
    TypeBundle {
        name: "decision",
        description: "Decision records",
        type_description: "A decision record",
    },
    TypeBundle {
        name: "task",
        description: "Task management",
        type_description: "A task",
    },
    TypeBundle {
        name: "learning",
        description: "Learning notes",
        type_description: "A learning note",
    },
    TypeBundle {
        name: "competitive",
        description: "Competitive analysis",
        type_description: "A competitive analysis note",
    },
];

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Upper bound for the watcher debounce window.
const MAX_WATCH_DEBOUNCE_MS: u64 = 10_000;

impl VaultConfig {
    /// Build a configuration from the named type bundles, with the default
    /// edge type and daemon settings.
    pub fn from_bundles<S: AsRef<str>>(bundles: &[S]) -> Result<Self, ConfigError> {
        let mut config = VaultConfig::default();
        for name in bundles {
            let name = name.as_ref();
            let bundle = TYPE_BUNDLES
                .iter()
                .find(|b| b.name == name)
                .ok_or_else(|| ConfigError::UnknownBundle(name.to_string()))?;
            config.add_bundle(bundle);
        }
        config.add_default_edge();
        Ok(config)
    }

    /// Configuration containing every built-in type bundle.
    pub fn with_all_bundles() -> Self {
        let mut config = VaultConfig::default();
        for bundle in TYPE_BUNDLES {
            config.add_bundle(bundle);
        }
        config.add_default_edge();
        config
    }

    fn add_bundle(&mut self, bundle: &TypeBundle) {
        self.types.insert(
            bundle.name.to_string(),
            TypeDef {
                description: bundle.type_description.to_string(),
                default_state: default_state(),
                key_max_len: default_key_max_len(),
            },
        );
    }

    fn add_default_edge(&mut self) {
        self.edges.insert(
            DEFAULT_EDGE_TYPE.to_string(),
            EdgeDef {
                description: "General relationship".to_string(),
                ..EdgeDef::default()
            },
        );
    }

    /// Load the configuration of the vault rooted at `vault_root` using async I/O.
    ///
    /// Fails with [`ConfigError::NotInitialized`] when the config file is absent.
    pub async fn load(vault_root: &Path) -> Result<Self, ConfigError> {
        let paths = VaultPaths::new(vault_root);
        let content = match tokio::fs::read_to_string(&paths.config).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotInitialized(paths.config));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: VaultConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_SCHEMA_VERSION {
            return Err(ConfigError::Validation(format!(
                "version must be {CONFIG_SCHEMA_VERSION}, got {}",
                self.version
            )));
        }

        for (name, def) in &self.types {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "type names must not be empty".to_string(),
                ));
            }
            if def.default_state.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "types.{name}.default_state must not be empty"
                )));
            }
            if def.key_max_len == 0 {
                return Err(ConfigError::Validation(format!(
                    "types.{name}.key_max_len must be non-zero"
                )));
            }
        }

        for name in self.edges.keys() {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "edge names must not be empty".to_string(),
                ));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.daemon.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "daemon.log_level must be one of {:?}, got {:?}",
                VALID_LOG_LEVELS, self.daemon.log_level
            )));
        }
        if self.daemon.watch_debounce_ms > MAX_WATCH_DEBOUNCE_MS {
            return Err(ConfigError::Validation(format!(
                "daemon.watch_debounce_ms must be at most {MAX_WATCH_DEBOUNCE_MS}, got {}",
                self.daemon.watch_debounce_ms
            )));
        }

        Ok(())
    }

    /// Names of the configured note types, in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = VaultConfig::default();
        assert_eq!(config.version, 1);
        assert!(config.types.is_empty());
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.watch_debounce_ms, 200);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = VaultConfig::parse("").unwrap();
        assert_eq!(config, VaultConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
version = 1

[types.note]
description = "A general note"
default_state = "draft"

[types.task]
description = "A task"
default_state = "open"
key_max_len = 32

[tags]
preferred = ["inbox"]

[edges.related-to]
description = "General relationship"

[edges.blocks]
allowed_from = ["task"]
allowed_to = ["task"]

[daemon]
log_level = "debug"
watch_debounce_ms = 50
"#;
        let config = VaultConfig::parse(toml).unwrap();
        assert_eq!(config.types.len(), 2);
        assert_eq!(config.types["task"].default_state, "open");
        assert_eq!(config.types["task"].key_max_len, 32);
        assert_eq!(config.types["note"].key_max_len, 64);
        assert_eq!(config.tags.preferred, vec!["inbox".to_string()]);
        assert_eq!(config.edges["blocks"].allowed_from, vec!["task".to_string()]);
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.watch_debounce_ms, 50);
    }

    #[test]
    fn test_reject_unknown_version() {
        let result = VaultConfig::parse("version = 2");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_reject_invalid_log_level() {
        let result = VaultConfig::parse("[daemon]\nlog_level = \"loud\"");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_reject_huge_debounce() {
        let result = VaultConfig::parse("[daemon]\nwatch_debounce_ms = 60000");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_reject_empty_default_state() {
        let result = VaultConfig::parse("[types.note]\ndefault_state = \"\"");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = VaultConfig::parse("this is not [valid toml");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_bundles() {
        let config = VaultConfig::from_bundles(&["note", "task"]).unwrap();
        assert_eq!(config.type_names().collect::<Vec<_>>(), vec!["note", "task"]);
        assert!(config.edges.contains_key(DEFAULT_EDGE_TYPE));
        config.validate().unwrap();
    }

    #[test]
    fn test_from_unknown_bundle() {
        let result = VaultConfig::from_bundles(&["nope"]);
        assert!(matches!(result, Err(ConfigError::UnknownBundle(name)) if name == "nope"));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = VaultConfig::with_all_bundles();
        let text = config.to_toml_string().unwrap();
        let parsed = VaultConfig::parse(&text).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.types.len(), TYPE_BUNDLES.len());
    }

    #[tokio::test]
    async fn test_load_missing_config_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let result = VaultConfig::load(dir.path()).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::NotInitialized(_)));
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_load_from_vault() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".touchlog")).unwrap();
        std::fs::write(
            dir.path().join(".touchlog/config.toml"),
            "[types.note]\ndescription = \"n\"\n",
        )
        .unwrap();

        let config = VaultConfig::load(dir.path()).await.unwrap();
        assert!(config.types.contains_key("note"));
    }
}
