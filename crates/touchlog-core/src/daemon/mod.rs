//! Vault daemon lifecycle: launch, singleton enforcement, and shutdown.
//!
//! `touchlog daemon start` calls [`Daemon::start`], which re-executes the
//! current binary as a detached child carrying [`DAEMON_CHILD_ENV`]. The
//! child calls [`Daemon::run`], which serves IPC until SIGINT, SIGTERM, or
//! an IPC `Shutdown`, then removes its PID and socket files.

mod pidfile;
#[allow(unsafe_code)]
mod process;
mod socket;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use touchlog_config::vault::validate_vault;
use touchlog_config::{ConfigError, VaultConfig, VaultPaths};

use crate::build_info;
use crate::index::{IndexBuilder, IndexError};
use crate::ipc::{Server, ServerError};
use crate::logging::{self, LoggingError};

pub use pidfile::PidFile;
pub use process::is_alive;
pub use socket::{SOCKET_DIR, resolve_socket_path};

/// Environment marker set on the detached daemon process.
pub const DAEMON_CHILD_ENV: &str = "_TOUCHLOG_DAEMON_CHILD";

/// How long `start` waits for the child to confirm, and `stop` waits for
/// the daemon to exit before escalating to SIGKILL.
pub const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to resolve vault path {path}: {source}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("daemon is not running")]
    NotRunning,

    #[error("failed to locate the touchlog executable: {0}")]
    CurrentExe(std::io::Error),

    #[error("failed to spawn daemon process: {0}")]
    Spawn(std::io::Error),

    #[error("daemon exited during startup ({status}); see {}", .log.display())]
    ExitedDuringStartup { status: ExitStatus, log: PathBuf },

    #[error("daemon did not confirm startup within {0:?}")]
    StartTimeout(Duration),

    #[error("failed to write pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to signal daemon (pid {pid}): {source}")]
    Signal { pid: u32, source: std::io::Error },

    #[error("failed to install signal handler: {0}")]
    SignalHandler(std::io::Error),

    #[error("rebuilding index: {0}")]
    Index(#[from] IndexError),

    #[error("starting IPC server: {0}")]
    Server(#[from] ServerError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

/// Handle on the daemon for one vault.
///
/// Holds a [`Server`] only inside the daemon process itself, after
/// [`Daemon::run`] has started serving.
pub struct Daemon {
    vault: PathBuf,
    paths: VaultPaths,
    pid_file: PidFile,
    server: Option<Server>,
}

impl Daemon {
    pub fn new(vault: &Path) -> Result<Self, DaemonError> {
        let vault = std::path::absolute(vault).map_err(|source| DaemonError::Resolve {
            path: vault.to_path_buf(),
            source,
        })?;
        let paths = VaultPaths::new(&vault);
        let pid_file = PidFile::new(&paths.pid_file, resolve_socket_path(&vault));
        Ok(Self {
            vault,
            paths,
            pid_file,
            server: None,
        })
    }

    /// Whether this process is the detached daemon child.
    pub fn is_daemon_child() -> bool {
        std::env::var(DAEMON_CHILD_ENV).is_ok_and(|v| v == "1")
    }

    pub fn vault(&self) -> &Path {
        &self.vault
    }

    pub fn socket_path(&self) -> &Path {
        self.pid_file.socket_path()
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Launch the daemon in the background and wait for it to confirm.
    /// Returns the daemon's PID.
    pub async fn start(&self) -> Result<u32, DaemonError> {
        validate_vault(&self.vault)?;
        let (running, pid) = self.pid_file.status();
        if running {
            return Err(DaemonError::AlreadyRunning(pid));
        }
        self.pid_file.cleanup_files();

        let exe = std::env::current_exe().map_err(DaemonError::CurrentExe)?;
        let args = [
            OsStr::new("--vault"),
            self.vault.as_os_str(),
            OsStr::new("daemon"),
            OsStr::new("start"),
        ];
        let mut child = process::spawn_detached(&exe, args).map_err(DaemonError::Spawn)?;
        let child_pid = child.id();
        info!(pid = child_pid, vault = %self.vault.display(), "daemon process spawned");

        let deadline = Instant::now() + LIFECYCLE_TIMEOUT;
        while Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;

            if let Ok(Some(status)) = child.try_wait() {
                self.pid_file.cleanup_files();
                return Err(DaemonError::ExitedDuringStartup {
                    status,
                    log: self.paths.log_file.clone(),
                });
            }
            if self.pid_file.get_pid() == child_pid && process::is_alive(child_pid) {
                info!(pid = child_pid, "daemon started");
                return Ok(child_pid);
            }
        }

        warn!(pid = child_pid, "daemon did not confirm startup, killing it");
        if let Err(e) = child.kill() {
            debug!(error = %e, "failed to kill unconfirmed daemon");
        }
        let _ = child.wait();
        self.pid_file.cleanup_files();
        Err(DaemonError::StartTimeout(LIFECYCLE_TIMEOUT))
    }

    /// Serve the vault in this process until shut down.
    ///
    /// Installs the daemon file logger, rebuilds the index if it is missing,
    /// starts the IPC server, and writes the PID file. Returns after the PID
    /// and socket files have been removed.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let config = VaultConfig::load(&self.vault).await?;
        let _log_guard = logging::init_daemon_logging(&self.paths, &config.daemon.log_level)?;

        // The detached child has no stderr; from here on, fatal errors must
        // reach daemon.log before they are returned.
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(DaemonError::SignalHandler)
            .inspect_err(log_startup_failure)?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(DaemonError::SignalHandler)
            .inspect_err(log_startup_failure)?;

        let done = self
            .start_server(config)
            .await
            .inspect_err(log_startup_failure)?;
        info!(
            pid = std::process::id(),
            version = build_info::VERSION_LONG,
            vault = %self.vault.display(),
            socket = %self.socket_path().display(),
            "daemon running"
        );

        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
            _ = wait_done(done) => info!("shutdown requested via IPC"),
        }

        self.cleanup().await;
        info!("daemon stopped");
        Ok(())
    }

    async fn start_server(&mut self, config: VaultConfig) -> Result<watch::Receiver<bool>, DaemonError> {
        validate_vault(&self.vault)?;

        // Checked before the rebuild, which replaces index.db.
        let (running, pid) = self.pid_file.status();
        if running && pid != std::process::id() {
            return Err(DaemonError::AlreadyRunning(pid));
        }

        if !self.paths.index_db.exists() {
            info!("index missing, rebuilding");
            let stats = IndexBuilder::new(&self.vault, &config).rebuild().await?;
            info!(notes = stats.notes, edges = stats.edges, "index rebuilt");
        }

        let server = Server::new(&self.vault, config)?;
        server.start()?;
        if let Err(e) = self.pid_file.write_pid(std::process::id()) {
            server.stop().await;
            self.pid_file.cleanup_files();
            return Err(e);
        }

        let done = server.done();
        self.server = Some(server);
        Ok(done)
    }

    async fn cleanup(&mut self) {
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
        self.pid_file.cleanup_files();
    }

    /// Stop the daemon for this vault.
    ///
    /// Inside the daemon process this shuts the server down directly.
    /// Otherwise the daemon is sent SIGTERM, then SIGKILL if it has not
    /// exited within [`LIFECYCLE_TIMEOUT`].
    pub async fn stop(&mut self) -> Result<(), DaemonError> {
        if self.server.is_some() {
            self.cleanup().await;
            return Ok(());
        }

        let (running, pid) = self.pid_file.status();
        if !running {
            self.pid_file.cleanup_files();
            return Err(DaemonError::NotRunning);
        }
        if pid == std::process::id() {
            self.pid_file.cleanup_files();
            return Ok(());
        }

        info!(pid, "stopping daemon");
        match process::terminate(pid) {
            Ok(()) => {}
            Err(e) if process::is_no_such_process(&e) => {}
            Err(source) => return Err(DaemonError::Signal { pid, source }),
        }

        let deadline = Instant::now() + LIFECYCLE_TIMEOUT;
        while process::is_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        if process::is_alive(pid) {
            warn!(pid, "daemon ignored SIGTERM, sending SIGKILL");
            if let Err(e) = process::kill(pid)
                && !process::is_no_such_process(&e)
            {
                return Err(DaemonError::Signal { pid, source: e });
            }
        }

        self.pid_file.cleanup_files();
        Ok(())
    }

    /// `(running, pid)` for this vault; `pid` is 0 when not running.
    pub fn status(&self) -> (bool, u32) {
        self.pid_file.status()
    }
}

fn log_startup_failure(e: &DaemonError) {
    error!(error = %e, "daemon failed to start");
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    let _ = done.wait_for(|d| *d).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use touchlog_test_utils::TestVault;

    #[test]
    fn test_daemon_child_marker() {
        // The test harness never runs as the detached child.
        assert!(!Daemon::is_daemon_child());
    }

    #[tokio::test]
    async fn test_start_requires_initialized_vault() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(dir.path()).unwrap();
        let err = daemon.start().await.unwrap_err();
        assert!(err.to_string().contains("not initialized"), "{err}");
    }

    #[tokio::test]
    async fn test_start_refuses_when_running() {
        let vault = TestVault::new().await;
        let daemon = Daemon::new(vault.root()).unwrap();
        daemon.pid_file().write_pid(std::process::id()).unwrap();

        let err = daemon.start().await.unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning(pid) if pid == std::process::id()));
        daemon.pid_file().cleanup_files();
    }

    #[tokio::test]
    async fn test_start_reports_child_that_exits_early() {
        // The re-executed binary is the test harness, which rejects
        // `--vault <path> daemon start` and exits immediately.
        let vault = TestVault::new().await;
        let daemon = Daemon::new(vault.root()).unwrap();

        let err = daemon.start().await.unwrap_err();
        match &err {
            DaemonError::ExitedDuringStartup { status, log } => {
                assert!(!status.success());
                assert_eq!(log, &vault.paths().log_file);
            }
            other => panic!("expected ExitedDuringStartup, got {other}"),
        }
        assert!(err.to_string().contains("daemon.log"), "{err}");
        assert!(!daemon.pid_file().path().exists());
        assert!(!daemon.socket_path().exists());
        assert_eq!(daemon.status(), (false, 0));
    }

    #[tokio::test]
    async fn test_run_leaves_index_alone_while_another_daemon_lives() {
        let vault = TestVault::new().await;
        let mut other = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        let other_pid = other.id();

        let mut daemon = Daemon::new(vault.root()).unwrap();
        daemon.pid_file().write_pid(other_pid).unwrap();
        let result = daemon.run().await;
        other.kill().unwrap();
        other.wait().unwrap();

        assert!(matches!(result, Err(DaemonError::AlreadyRunning(pid)) if pid == other_pid));
        assert!(!vault.paths().index_db.exists());
        assert!(!vault.paths().index_db_tmp.exists());
        assert_eq!(daemon.pid_file().get_pid(), other_pid);
    }

    #[tokio::test]
    async fn test_status_and_stop_when_not_running() {
        let vault = TestVault::new().await;
        let mut daemon = Daemon::new(vault.root()).unwrap();
        assert_eq!(daemon.status(), (false, 0));
        assert!(matches!(daemon.stop().await, Err(DaemonError::NotRunning)));
    }

    #[tokio::test]
    async fn test_stop_with_own_pid_only_cleans_files() {
        let vault = TestVault::new().await;
        let mut daemon = Daemon::new(vault.root()).unwrap();
        daemon.pid_file().write_pid(std::process::id()).unwrap();

        daemon.stop().await.unwrap();
        assert!(!daemon.pid_file().path().exists());
    }

    #[tokio::test]
    async fn test_stale_pid_is_not_running() {
        let vault = TestVault::new().await;
        let daemon = Daemon::new(vault.root()).unwrap();
        daemon.pid_file().write_pid(9_999_999).unwrap();
        std::fs::write(daemon.socket_path(), "").unwrap();

        assert_eq!(daemon.status(), (false, 0));
        assert!(!daemon.pid_file().path().exists());
        assert!(!daemon.socket_path().exists());
    }
}
