//! Build-time metadata embedded by `build.rs`.

/// Short git commit hash, or `"unknown"` when built outside a checkout.
pub const GIT_HASH: &str = env!("TOUCHLOG_GIT_HASH");

/// Build time as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("TOUCHLOG_BUILD_TIMESTAMP");

/// Cargo profile the binary was built with.
pub const BUILD_PROFILE: &str = env!("TOUCHLOG_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Long version string for `--version`, e.g. `"0.1.0 (abc1234, release)"`.
pub const VERSION_LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TOUCHLOG_GIT_HASH"),
    ", ",
    env!("TOUCHLOG_BUILD_PROFILE"),
    ")"
);
