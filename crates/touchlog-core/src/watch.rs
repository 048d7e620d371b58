//! Filesystem watcher for a vault.
//!
//! Wraps a `notify` watcher, keeps only note files, and debounces bursts of
//! events per path before handing them to consumers over bounded channels.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify::event::{EventKind, ModifyKind};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use touchlog_config::vault::META_DIR;

use crate::note::is_note_path;

/// Capacity of the debounced events channel.
pub const EVENTS_CAPACITY: usize = 100;
/// Capacity of the errors channel.
pub const ERRORS_CAPACITY: usize = 10;

const RAW_CAPACITY: usize = 1024;

/// Errors surfaced by the watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to walk vault: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("watcher already started")]
    AlreadyStarted,
}

/// Kind of change observed on a note file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Write,
    Remove,
    Rename,
}

impl Operation {
    fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(_) => Some(Self::Write),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }
}

/// A change to one note file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub path: PathBuf,
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(path: impl AsRef<Path>, operation: Operation) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            operation,
            timestamp: Utc::now(),
        }
    }
}

type SharedWatcher = Arc<Mutex<Option<RecommendedWatcher>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watches every directory of a vault except `.touchlog/`.
///
/// Consumers take the two receivers once with [`FileWatcher::take_events`]
/// and [`FileWatcher::take_errors`]. Both channels are bounded; when a
/// consumer falls behind, new items are dropped rather than blocking the
/// notify thread.
pub struct FileWatcher {
    vault_root: PathBuf,
    debounce: Duration,
    watcher: SharedWatcher,
    senders: Mutex<Option<(mpsc::Sender<Event>, mpsc::Sender<WatchError>)>>,
    events: Mutex<Option<mpsc::Receiver<Event>>>,
    errors: Mutex<Option<mpsc::Receiver<WatchError>>>,
    stop_tx: watch::Sender<bool>,
}

impl FileWatcher {
    pub fn new(vault_root: &Path, debounce: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENTS_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERRORS_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            vault_root: vault_root.to_path_buf(),
            debounce,
            watcher: Arc::new(Mutex::new(None)),
            senders: Mutex::new(Some((events_tx, errors_tx))),
            events: Mutex::new(Some(events_rx)),
            errors: Mutex::new(Some(errors_rx)),
            stop_tx,
        }
    }

    /// Register watches and spawn the debounce loop. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> Result<(), WatchError> {
        let (events_tx, errors_tx) = lock(&self.senders)
            .take()
            .ok_or(WatchError::AlreadyStarted)?;

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = raw_tx.try_send(res);
            },
            Config::default(),
        )?;

        let dirs = watch_dirs(&mut watcher, &self.vault_root)?;
        debug!(vault = %self.vault_root.display(), dirs, "watcher started");
        *lock(&self.watcher) = Some(watcher);

        let debounce_loop = DebounceLoop {
            watcher: Arc::clone(&self.watcher),
            debounce: self.debounce,
            pending: HashMap::new(),
            events_tx,
            errors_tx,
        };
        tokio::spawn(debounce_loop.run(raw_rx, self.stop_tx.subscribe()));
        Ok(())
    }

    /// Stop watching. Safe to call more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        if lock(&self.watcher).take().is_some() {
            debug!(vault = %self.vault_root.display(), "watcher stopped");
        }
    }

    pub fn take_events(&self) -> Option<mpsc::Receiver<Event>> {
        lock(&self.events).take()
    }

    pub fn take_errors(&self) -> Option<mpsc::Receiver<WatchError>> {
        lock(&self.errors).take()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Add a non-recursive watch on `root` and every directory below it,
/// skipping `.touchlog/`. Returns the number of directories watched.
fn watch_dirs(watcher: &mut RecommendedWatcher, root: &Path) -> Result<usize, WatchError> {
    let mut count = 0;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == META_DIR));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            watcher.watch(entry.path(), RecursiveMode::NonRecursive)?;
            count += 1;
        }
    }
    Ok(count)
}

struct Pending {
    operation: Operation,
    first_seen: Instant,
    timestamp: DateTime<Utc>,
}

struct DebounceLoop {
    watcher: SharedWatcher,
    debounce: Duration,
    pending: HashMap<PathBuf, Pending>,
    events_tx: mpsc::Sender<Event>,
    errors_tx: mpsc::Sender<WatchError>,
}

impl DebounceLoop {
    async fn run(
        mut self,
        mut raw_rx: mpsc::Receiver<notify::Result<notify::Event>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let tick = (self.debounce / 4).clamp(Duration::from_millis(5), Duration::from_millis(50));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(Ok(event)) => self.record(event),
                    Some(Err(e)) => self.report(WatchError::Notify(e)),
                    None => break,
                },
                _ = interval.tick() => self.flush(),
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        trace!("watcher loop exited");
    }

    fn record(&mut self, event: notify::Event) {
        let Some(operation) = Operation::from_kind(&event.kind) else {
            return;
        };

        for path in event.paths {
            if !is_note_path(&path) {
                if operation == Operation::Create && path.is_dir() {
                    self.watch_new_dir(&path);
                }
                continue;
            }

            let now = Instant::now();
            self.pending
                .entry(path)
                .and_modify(|p| {
                    p.operation = operation;
                    p.timestamp = Utc::now();
                })
                .or_insert_with(|| Pending {
                    operation,
                    first_seen: now,
                    timestamp: Utc::now(),
                });
        }
    }

    fn watch_new_dir(&self, dir: &Path) {
        if dir.file_name().is_some_and(|n| n == META_DIR) {
            return;
        }
        let mut guard = lock(&self.watcher);
        let Some(watcher) = guard.as_mut() else {
            return;
        };
        match watch_dirs(watcher, dir) {
            Ok(n) => debug!(dir = %dir.display(), dirs = n, "watching new directory"),
            Err(e) => {
                drop(guard);
                self.report(e);
            }
        }
    }

    /// Emit every path whose debounce window has elapsed, with the last
    /// operation seen for it.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let debounce = self.debounce;
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.first_seen.elapsed() >= debounce)
            .map(|(path, _)| path.clone())
            .collect();

        for path in ready {
            let Some(p) = self.pending.remove(&path) else {
                continue;
            };
            let event = Event {
                path,
                operation: p.operation,
                timestamp: p.timestamp,
            };
            if let Err(e) = self.events_tx.try_send(event) {
                warn!(error = %e, "watch event dropped");
            }
        }
    }

    fn report(&self, error: WatchError) {
        if let Err(e) = self.errors_tx.try_send(error) {
            debug!(error = %e, "watch error dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use tempfile::TempDir;

    #[test]
    fn test_operation_mapping() {
        assert_eq!(
            Operation::from_kind(&EventKind::Create(CreateKind::File)),
            Some(Operation::Create)
        );
        assert_eq!(
            Operation::from_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Any))),
            Some(Operation::Write)
        );
        assert_eq!(
            Operation::from_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(Operation::Rename)
        );
        assert_eq!(
            Operation::from_kind(&EventKind::Remove(RemoveKind::File)),
            Some(Operation::Remove)
        );
        assert_eq!(Operation::from_kind(&EventKind::Any), None);
    }

    #[test]
    fn test_operation_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Operation::Rename).unwrap(), "\"rename\"");
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(dir.path(), Duration::from_millis(10));
        watcher.start().unwrap();
        assert!(matches!(watcher.start(), Err(WatchError::AlreadyStarted)));
        watcher.stop();
        watcher.stop();
    }

    #[tokio::test]
    async fn test_receivers_are_taken_once() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(dir.path(), Duration::from_millis(10));
        assert!(watcher.take_events().is_some());
        assert!(watcher.take_events().is_none());
        assert!(watcher.take_errors().is_some());
        assert!(watcher.take_errors().is_none());
    }

    #[tokio::test]
    async fn test_note_write_is_reported_once() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("note")).unwrap();
        std::fs::create_dir_all(dir.path().join(".touchlog")).unwrap();

        let watcher = FileWatcher::new(dir.path(), Duration::from_millis(50));
        let mut events = watcher.take_events().unwrap();
        watcher.start().unwrap();

        let path = dir.path().join("note/a.Rmd");
        std::fs::write(&path, "one").unwrap();
        std::fs::write(&path, "two").unwrap();
        std::fs::write(dir.path().join("note/ignored.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".touchlog/index.db"), "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(event.path, path);

        // The burst collapses into a single event.
        let extra = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
        assert!(extra.is_err(), "unexpected extra event: {extra:?}");

        watcher.stop();
    }

    #[tokio::test]
    async fn test_new_directories_are_watched() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(dir.path(), Duration::from_millis(20));
        let mut events = watcher.take_events().unwrap();
        watcher.start().unwrap();

        let sub = dir.path().join("fresh");
        std::fs::create_dir_all(&sub).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let path = sub.join("n.Rmd");
        std::fs::write(&path, "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(event.path, path);
        watcher.stop();
    }
}
