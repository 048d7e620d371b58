#![deny(unsafe_code)]

//! Shared test utilities for the touchlog workspace.
//!
//! Provides temporary vaults, config builders, and tracing helpers so that
//! individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! touchlog-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod tracing_setup;
pub mod vault;

pub use config::TestConfigBuilder;
pub use vault::TestVault;
