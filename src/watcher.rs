//! File watching using the notify crate.
//!
//! [`FileWatcher`] is a [`BackgroundService`]: its `run` blocks on the native
//! watch source on a dedicated thread, feeds every notification to the
//! matching [`FileCursor`] and hands the result to a delivery callback.

use crate::config::WatchedFile;
use crate::cursor::{CursorStatus, EventKind, FileCursor};
use crate::error::{Error, Result};
use crate::service::BackgroundService;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Upper bound on how long `stop` takes to be observed by the watch loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const COMPONENT: &str = "FileWatcher";

/// One native notification batch for a single file.
///
/// Lives only for the duration of the delivery callback. `cursor` is the
/// tracked cursor for `filename`, or `None` if the path is not tracked.
#[derive(Debug)]
pub struct FileNotifierEvent<'a> {
    pub filename: PathBuf,
    pub kinds: Vec<EventKind>,
    pub cursor: Option<&'a mut FileCursor>,
}

impl FileNotifierEvent<'_> {
    pub fn has(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Receives every notification on the watcher thread. Returning an error is
/// treated as an unrecoverable failure of the watcher.
pub type DeliveryCallback = Box<dyn FnMut(FileNotifierEvent<'_>) -> Result<()> + Send>;

/// Watches a fixed set of files and tracks a read cursor for each.
pub struct FileWatcher {
    cursors: Mutex<HashMap<PathBuf, FileCursor>>,
    callback: Mutex<DeliveryCallback>,
    running: AtomicBool,
    watching: AtomicBool,
    poll_interval: Duration,
    critical: Option<UnboundedSender<Error>>,
}

impl FileWatcher {
    /// Registers `files` and bootstraps a cursor for each one that exists.
    ///
    /// Files that cannot be bootstrapped are logged and left out.
    pub fn new<I, F>(files: I, callback: F) -> Self
    where
        I: IntoIterator<Item = WatchedFile>,
        F: FnMut(FileNotifierEvent<'_>) -> Result<()> + Send + 'static,
    {
        let mut cursors = HashMap::new();
        for file in files {
            let configured = file.path.clone();
            match FileCursor::new(file.into()) {
                Ok(cursor) => {
                    tracing::debug!(
                        path = %cursor.path().display(),
                        window_start = cursor.window_start(),
                        window_end = cursor.window_end(),
                        "cursor bootstrapped"
                    );
                    cursors.insert(cursor.path().to_path_buf(), cursor);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %configured.display(),
                        error = %e,
                        "cannot track file, skipping"
                    );
                }
            }
        }

        Self {
            cursors: Mutex::new(cursors),
            callback: Mutex::new(Box::new(callback)),
            running: AtomicBool::new(false),
            watching: AtomicBool::new(false),
            poll_interval: DEFAULT_POLL_INTERVAL,
            critical: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Also report a critical failure on `sender`, so the application can
    /// shut down without waiting for `stop`.
    pub fn with_critical_channel(mut self, sender: UnboundedSender<Error>) -> Self {
        self.critical = Some(sender);
        self
    }

    /// Absolute paths of the files currently tracked, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.cursors.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether native watches are registered and the loop is polling.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    fn watch_loop(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;

        {
            let mut cursors = self.cursors.lock();
            let paths: Vec<PathBuf> = cursors.keys().cloned().collect();
            for path in paths {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "cannot watch file, no longer tracking"
                    );
                    cursors.remove(&path);
                }
            }
            tracing::info!(files = cursors.len(), "watching files");
        }
        self.watching.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            let first = match rx.recv_timeout(self.poll_interval) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Watcher(notify::Error::generic(
                        "native watch channel closed",
                    )));
                }
            };

            let mut events = vec![first?];
            while let Ok(event) = rx.try_recv() {
                events.push(event?);
            }

            for (filename, kinds) in coalesce(events) {
                self.dispatch(&mut watcher, filename, kinds)?;
            }
        }

        tracing::debug!("watch loop exited");
        Ok(())
    }

    fn dispatch(
        &self,
        watcher: &mut RecommendedWatcher,
        filename: PathBuf,
        kinds: Vec<EventKind>,
    ) -> Result<()> {
        let mut cursors = self.cursors.lock();

        let status = match cursors.get_mut(&filename) {
            Some(cursor) => cursor.on_event(&kinds)?,
            None => CursorStatus::Active,
        };

        if status == CursorStatus::Removed {
            cursors.remove(&filename);
            drop(cursors);
            if let Err(e) = watcher.unwatch(&filename) {
                // inotify drops the watch by itself on delete.
                tracing::debug!(path = %filename.display(), error = %e, "unwatch failed");
            }
            tracing::info!(
                path = %filename.display(),
                kinds = ?kinds,
                "watched file removed, no longer tracking"
            );
            return Ok(());
        }

        tracing::trace!(path = %filename.display(), kinds = ?kinds, "file event");
        let cursor = cursors.get_mut(&filename);
        let event = FileNotifierEvent {
            filename,
            kinds,
            cursor,
        };

        let mut callback = self.callback.lock();
        (*callback)(event)
    }
}

impl BackgroundService for FileWatcher {
    type Output = ();

    fn name(&self) -> &'static str {
        COMPONENT
    }

    fn on_start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning { service: COMPONENT });
        }

        tracing::info!(files = ?self.watched_paths(), "starting file watcher");
        Ok(())
    }

    fn run(&self) -> Result<()> {
        let result = self.watch_loop();
        self.watching.store(false, Ordering::SeqCst);

        result.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            tracing::error!(component = COMPONENT, error = %e, details = ?e, "watch loop failed");

            let message = e.to_string();
            if let Some(critical) = &self.critical {
                let _ = critical.send(Error::Critical {
                    component: COMPONENT,
                    message: message.clone(),
                });
            }
            Error::Critical {
                component: COMPONENT,
                message,
            }
        })
    }

    fn on_stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("stopping file watcher");
        } else {
            tracing::warn!("file watcher already stopped");
        }
        Ok(())
    }
}

/// Groups consecutive notifications for the same path, keeping arrival order.
fn coalesce(events: Vec<Event>) -> Vec<(PathBuf, Vec<EventKind>)> {
    let mut batches: Vec<(PathBuf, Vec<EventKind>)> = Vec::new();

    for event in events {
        let kind = EventKind::from(&event.kind);
        for path in event.paths {
            match batches.last_mut() {
                Some((last, kinds)) if *last == path => kinds.push(kind),
                _ => batches.push((path, vec![kind])),
            }
        }
    }

    batches
}
