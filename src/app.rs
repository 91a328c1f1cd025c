//! Wires the watcher, the event bus and both servers into one application.

use crate::broadcast::BroadcastServer;
use crate::bus::{EventBus, EventSender, Subscriber};
use crate::config::Config;
use crate::cursor::{EventKind, FileCursor};
use crate::error::{Error, Result};
use crate::http::HttpServer;
use crate::service::ServiceRunner;
use crate::watcher::{FileNotifierEvent, FileWatcher};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Records newly appended to one tracked file, as pushed to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecords {
    pub path: PathBuf,
    pub color: String,
    pub lines: Vec<String>,
}

/// Delivery callback that turns every completed write into a [`FileRecords`]
/// posted on the bus.
///
/// Runs on the watcher thread. The cursor is advanced once per delivered
/// window. A window lost to truncation or deletion is logged and skipped.
pub fn forward_records(
    sender: EventSender,
) -> impl FnMut(FileNotifierEvent<'_>) -> Result<()> + Send + 'static {
    let mut buffer = Vec::new();
    move |event| {
        if !event.has(EventKind::CloseWrite) {
            return Ok(());
        }
        let Some(cursor) = event.cursor else {
            return Ok(());
        };
        if cursor.pending() == 0 {
            return Ok(());
        }

        buffer.clear();
        match cursor.extract(&mut buffer) {
            Ok(_) => {}
            Err(e @ Error::WindowUnavailable { .. }) => {
                tracing::warn!(error = %e, "skipping unreadable window");
                cursor.advance();
                return Ok(());
            }
            // Deleted after the close-write was measured; the pending
            // delete notification deregisters the cursor.
            Err(Error::FileRemoved { path }) => {
                tracing::warn!(
                    path = %path,
                    window_start = cursor.window_start(),
                    window_end = cursor.window_end(),
                    "file removed before its window was read, skipping"
                );
                cursor.advance();
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        cursor.advance();

        let lines = records(cursor, &buffer);
        if lines.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            path = %cursor.path().display(),
            records = lines.len(),
            "forwarding records"
        );
        sender.post(FileRecords {
            path: cursor.path().to_path_buf(),
            color: cursor.file().color.clone(),
            lines,
        });
        Ok(())
    }
}

fn records(cursor: &FileCursor, bytes: &[u8]) -> Vec<String> {
    if cursor.has_valid_delimiter() {
        return cursor.split(bytes);
    }
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![text.into_owned()]
    }
}

/// Bus subscriber pushing each [`FileRecords`] to every WebSocket client as
/// JSON.
pub fn broadcast_records(server: Arc<BroadcastServer>) -> Subscriber<FileRecords> {
    Arc::new(move |records: &FileRecords| match serde_json::to_string(records) {
        Ok(message) => {
            let clients = server.push_message(&message);
            tracing::trace!(path = %records.path.display(), clients, "records pushed");
        }
        Err(e) => {
            tracing::warn!(path = %records.path.display(), error = %e, "cannot encode records");
        }
    })
}

/// Stops the dispatch loop once every queued value has been delivered, then
/// detaches `subscriber`.
async fn stop_bus(
    bus: &EventBus,
    subscriber: &Subscriber<FileRecords>,
    dispatcher: JoinHandle<Result<()>>,
) {
    bus.stop();
    match dispatcher.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "event bus stopped with error"),
        Err(e) => tracing::warn!(error = %e, "event bus task failed"),
    }
    bus.unregister(subscriber);
}

pub struct Application {
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Starts every component, waits for `shutdown` or a critical failure,
    /// then stops them in reverse dependency order.
    ///
    /// A critical failure is returned after the shutdown sequence completes.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let websocket = &self.config.server.websocket;
        let broadcast = Arc::new(BroadcastServer::new(websocket.host.clone(), websocket.port));
        broadcast.start().await?;

        let http = HttpServer::from_config(&self.config);
        if let Err(e) = http.start().await {
            let _ = broadcast.stop().await;
            return Err(e);
        }

        let bus = Arc::new(EventBus::new());
        let subscriber = broadcast_records(Arc::clone(&broadcast));
        bus.register(Arc::clone(&subscriber));
        let dispatcher = tokio::spawn({
            let bus = Arc::clone(&bus);
            async move { bus.run().await }
        });

        let (critical_tx, mut critical_rx) = mpsc::unbounded_channel();
        let watcher = FileWatcher::new(self.config.files.clone(), forward_records(bus.sender()))
            .with_critical_channel(critical_tx);
        let mut runner = ServiceRunner::new(watcher);
        let mut outcome = runner.start();

        if outcome.is_ok() {
            tracing::info!(
                files = runner.service().watched_paths().len(),
                "log tracker running"
            );
            outcome = tokio::select! {
                _ = shutdown => {
                    tracing::info!("shutdown requested");
                    Ok(())
                }
                Some(e) = critical_rx.recv() => {
                    tracing::error!(error = %e, "critical failure, shutting down");
                    Err(e)
                }
            };

            let stopped = tokio::task::spawn_blocking(move || runner.stop()).await?;
            outcome = outcome.and(stopped);
        }

        stop_bus(&bus, &subscriber, dispatcher).await;
        if let Err(e) = broadcast.stop().await {
            tracing::warn!(error = %e, "websocket server stopped with error");
        }
        if let Err(e) = http.stop().await {
            tracing::warn!(error = %e, "http server stopped with error");
        }

        tracing::info!("log tracker stopped");
        outcome
    }
}
