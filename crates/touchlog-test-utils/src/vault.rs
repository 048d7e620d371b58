//! Temporary vault fixtures.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use touchlog_config::vault::init_vault;
use touchlog_config::{VaultConfig, VaultPaths};

use crate::config::TestConfigBuilder;

/// An initialised vault in a temporary directory.
///
/// The directory is deleted when this value is dropped, even on panic.
pub struct TestVault {
    config: VaultConfig,
    paths: VaultPaths,
    _dir: TempDir,
}

impl TestVault {
    /// A vault initialised with [`TestConfigBuilder`]'s defaults.
    pub async fn new() -> Self {
        Self::with_config(TestConfigBuilder::new().build()).await
    }

    pub async fn with_config(config: VaultConfig) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let paths = init_vault(dir.path(), &config)
            .await
            .expect("failed to initialise test vault");
        Self {
            config,
            paths,
            _dir: dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// Write `<type>/<key>.Rmd` with a complete frontmatter and `body`.
    pub fn write_note(&self, type_name: &str, key: &str, id: &str, body: &str) -> PathBuf {
        let content = format!(
            "---\nid: {id}\ntype: {type_name}\nkey: {key}\ntitle: {key}\nstate: draft\n---\n{body}\n"
        );
        self.write_raw(&format!("{type_name}/{key}.Rmd"), &content)
    }

    /// Write `content` to the vault-relative path `rel`, creating parent
    /// directories.
    pub fn write_raw(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create note directory");
        }
        std::fs::write(&path, content).expect("failed to write note");
        path
    }
}
