use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{DaemonError, process};

/// The `.touchlog/daemon.pid` record that marks a running daemon.
///
/// A PID file and its socket are created together and removed together; a
/// probe that finds the recorded process dead removes both.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
    socket_path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            socket_path: socket_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Record `pid`, creating `.touchlog/` if needed.
    pub fn write_pid(&self, pid: u32) -> Result<(), DaemonError> {
        let io_err = |source| DaemonError::PidFile {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&self.path, format!("{pid}\n")).map_err(io_err)?;
        debug!(pid, path = %self.path.display(), "pid file written");
        Ok(())
    }

    /// The recorded PID, or 0 when the file is absent or unparseable.
    pub fn get_pid(&self) -> u32 {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether the recorded process is alive. A dead process has its PID and
    /// socket files removed.
    pub fn is_running(&self) -> bool {
        let pid = self.get_pid();
        if pid == 0 {
            return false;
        }
        if process::is_alive(pid) {
            return true;
        }
        debug!(pid, "removing stale daemon files");
        self.cleanup_files();
        false
    }

    /// `(running, pid)`; `pid` is 0 when not running.
    pub fn status(&self) -> (bool, u32) {
        if self.is_running() {
            (true, self.get_pid())
        } else {
            (false, 0)
        }
    }

    /// Remove the PID and socket files. Missing files are fine.
    pub fn cleanup_files(&self) {
        for path in [&self.path, &self.socket_path] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove daemon file"),
            }
        }
    }
}
