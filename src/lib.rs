//! A log tracker that tails a configured set of files and pushes newly
//! appended records to WebSocket clients in real time.
//!
//! A [`FileWatcher`] runs on its own thread, keeps a [`FileCursor`] per file
//! and hands each completed write to a delivery callback. The callback posts
//! [`FileRecords`] on an [`EventBus`], whose subscriber fans them out through
//! the [`BroadcastServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use log_tracker::{Application, Config};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!
//!     Application::new(config).run(shutdown).await?;
//!     Ok(())
//! }
//! ```

mod app;
mod broadcast;
mod bus;
mod config;
mod cursor;
mod error;
mod http;
pub mod logging;
mod service;
mod watcher;

#[cfg(test)]
mod test_helpers;

pub use app::{Application, FileRecords, broadcast_records, forward_records};
pub use broadcast::{BroadcastServer, CLIENT_QUEUE_CAPACITY, ClientId};
pub use bus::{EventBus, EventSender, Subscriber};
pub use config::{
    Config, HttpConfig, LogsConfig, ServerConfig, WatchedFile, WebSocketConfig,
};
pub use cursor::{BACK_SCAN, CursorStatus, EventKind, FileCursor};
pub use error::{Error, Result};
pub use http::{FileEntry, HttpServer, router};
pub use service::{BackgroundService, ServiceRunner};
pub use watcher::{DEFAULT_POLL_INTERVAL, DeliveryCallback, FileNotifierEvent, FileWatcher};
