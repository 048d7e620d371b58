use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{ConfigError, VaultConfig};

/// Name of the vault metadata directory.
pub const META_DIR: &str = ".touchlog";

/// Well-known files inside a vault's `.touchlog/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    pub root: PathBuf,
    pub meta_dir: PathBuf,
    pub config: PathBuf,
    pub index_db: PathBuf,
    pub index_db_tmp: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    /// Vault-local socket path, used only when the shared path cannot be derived.
    pub fallback_socket: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let meta_dir = root.join(META_DIR);
        Self {
            config: meta_dir.join("config.toml"),
            index_db: meta_dir.join("index.db"),
            index_db_tmp: meta_dir.join("index.db.tmp"),
            pid_file: meta_dir.join("daemon.pid"),
            log_file: meta_dir.join("daemon.log"),
            fallback_socket: meta_dir.join("daemon.sock"),
            meta_dir,
            root,
        }
    }
}

/// Confirm that `root` is an initialised vault (its config file exists).
pub fn validate_vault(root: &Path) -> Result<(), ConfigError> {
    let paths = VaultPaths::new(root);
    if paths.config.is_file() {
        Ok(())
    } else {
        Err(ConfigError::NotInitialized(paths.config))
    }
}

/// Find the vault containing `start` by walking up to the first directory
/// that has a `.touchlog/` subdirectory.
pub fn find_vault_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let start = std::path::absolute(start)?;
    for dir in start.ancestors() {
        if dir.join(META_DIR).is_dir() {
            debug!(vault = %dir.display(), "found vault root");
            return Ok(dir.to_path_buf());
        }
    }
    Err(ConfigError::VaultNotFound(start))
}

/// Resolve the vault to operate on: an explicit path is made absolute as-is,
/// otherwise the vault is discovered from the current directory.
pub fn resolve_vault(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(std::path::absolute(path)?),
        None => find_vault_root(&std::env::current_dir()?),
    }
}

/// Initialise a vault at `root`: create `.touchlog/`, one directory per type,
/// and write `config`.
pub async fn init_vault(root: &Path, config: &VaultConfig) -> Result<VaultPaths, ConfigError> {
    config.validate()?;

    let paths = VaultPaths::new(root);
    if tokio::fs::try_exists(&paths.config).await? {
        return Err(ConfigError::AlreadyInitialized(paths.root));
    }

    tokio::fs::create_dir_all(&paths.meta_dir).await?;
    for type_name in config.type_names() {
        tokio::fs::create_dir_all(paths.root.join(type_name)).await?;
    }
    tokio::fs::write(&paths.config, config.to_toml_string()?).await?;

    info!(vault = %paths.root.display(), types = config.types.len(), "vault initialized");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_vault_paths_layout() {
        let paths = VaultPaths::new("/v");
        assert_eq!(paths.config, PathBuf::from("/v/.touchlog/config.toml"));
        assert_eq!(paths.pid_file, PathBuf::from("/v/.touchlog/daemon.pid"));
        assert_eq!(paths.index_db, PathBuf::from("/v/.touchlog/index.db"));
        assert_eq!(paths.fallback_socket, PathBuf::from("/v/.touchlog/daemon.sock"));
    }

    #[test]
    fn test_validate_uninitialized_vault() {
        let dir = TempDir::new().unwrap();
        let err = validate_vault(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_init_then_validate() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig::from_bundles(&["note", "task"]).unwrap();

        let paths = init_vault(dir.path(), &config).await.unwrap();
        assert!(paths.config.is_file());
        assert!(dir.path().join("note").is_dir());
        assert!(dir.path().join("task").is_dir());
        validate_vault(dir.path()).unwrap();

        let loaded = VaultConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig::with_all_bundles();
        init_vault(dir.path(), &config).await.unwrap();

        let result = init_vault(dir.path(), &config).await;
        assert!(matches!(result, Err(ConfigError::AlreadyInitialized(_))));
    }

    #[test]
    fn test_find_vault_root_walks_up() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".touchlog")).unwrap();
        let nested = dir.path().join("note/deep/er");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_vault_root(&nested).unwrap();
        assert_eq!(found, dir.path());
    }

    #[test]
    fn test_find_vault_root_none() {
        let dir = TempDir::new().unwrap();
        let result = find_vault_root(dir.path());
        assert!(matches!(result, Err(ConfigError::VaultNotFound(_))));
    }
}
