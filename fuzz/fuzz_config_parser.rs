//! Fuzz target for the vault configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `VaultConfig::parse()`, which parses TOML and
//! validates the result.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(config) = touchlog_config::VaultConfig::parse(s)
    {
        // A config that parsed and validated must serialise back.
        let _ = config.to_toml_string();
    }
});
