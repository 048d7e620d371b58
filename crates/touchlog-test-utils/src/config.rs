//! Configuration builders for tests.

use touchlog_config::{TypeDef, VaultConfig};

/// Fluent builder for [`VaultConfig`] in tests.
///
/// Starts from the `note` and `task` bundles with a short watcher debounce
/// so watcher-driven tests settle quickly.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .bundles(&["note", "decision"])
///     .watch_debounce_ms(20)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: VaultConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config =
            VaultConfig::from_bundles(&["note", "task"]).expect("built-in bundles exist");
        config.daemon.watch_debounce_ms = 50;
        Self { config }
    }

    /// Replace the note types with the given built-in bundles.
    pub fn bundles(mut self, names: &[&str]) -> Self {
        let daemon = self.config.daemon.clone();
        self.config = VaultConfig::from_bundles(names).expect("unknown type bundle");
        self.config.daemon = daemon;
        self
    }

    pub fn note_type(mut self, name: &str, default_state: &str) -> Self {
        self.config.types.insert(
            name.to_string(),
            TypeDef {
                description: format!("{name} notes"),
                default_state: default_state.to_string(),
                key_max_len: 64,
            },
        );
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.daemon.log_level = level.to_string();
        self
    }

    pub fn watch_debounce_ms(mut self, ms: u64) -> Self {
        self.config.daemon.watch_debounce_ms = ms;
        self
    }

    pub fn build(self) -> VaultConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
