//! Socket path derivation.
//!
//! Unix socket paths are limited to roughly 104-108 bytes, so the socket
//! does not live inside the vault. Its name is derived from a hash of the
//! vault's canonical path under a fixed short directory.

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use touchlog_config::VaultPaths;

/// Directory holding every vault's socket.
pub const SOCKET_DIR: &str = "/tmp";

/// Bytes of the path digest used in the socket name (48 bits).
const HASH_PREFIX_BYTES: usize = 6;

/// Socket path for the vault at `vault`.
///
/// Symlink resolution is best effort. If the vault cannot be made absolute,
/// the vault-local `.touchlog/daemon.sock` is returned; that path may be too
/// long to bind, which then fails at bind time.
pub fn resolve_socket_path(vault: &Path) -> PathBuf {
    match std::path::absolute(vault) {
        Ok(abs) => {
            let canonical = std::fs::canonicalize(&abs).unwrap_or(abs);
            socket_path_for(&canonical)
        }
        Err(e) => {
            warn!(vault = %vault.display(), error = %e, "cannot resolve vault path, using vault-local socket");
            VaultPaths::new(vault).fallback_socket
        }
    }
}

fn socket_path_for(canonical: &Path) -> PathBuf {
    let digest = Sha256::digest(canonical.as_os_str().as_bytes());
    let name = format!("touchlog-{}.sock", hex::encode(&digest[..HASH_PREFIX_BYTES]));
    Path::new(SOCKET_DIR).join(name)
}
