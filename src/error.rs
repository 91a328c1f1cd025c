//! Error types for the log tracker.

use thiserror::Error;

/// The main error type for log tracker operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors when reading watched files or binding sockets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// The configuration file could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The configuration parsed but is not usable.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A watched file did not exist when its cursor was bootstrapped.
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// A watched file was deleted and its cursor is stopped.
    #[error("File no longer exists: {path}")]
    FileRemoved { path: String },

    /// The cursor window could not be read in full (the file shrank under us).
    #[error("Window [{start}, {end}) of {path} is no longer readable")]
    WindowUnavailable { path: String, start: u64, end: u64 },

    /// A background service was started twice without being stopped.
    #[error("{service} is already running")]
    AlreadyRunning { service: &'static str },

    /// A component was stopped before being started.
    #[error("{component} is not started")]
    NotStarted { component: &'static str },

    /// A component was started twice without being stopped.
    #[error("{component} is already started")]
    AlreadyStarted { component: &'static str },

    /// The worker thread of a background service panicked.
    #[error("{service} worker panicked")]
    ServicePanicked { service: &'static str },

    /// Unrecoverable failure; the whole application is expected to shut down.
    #[error("Critical error in {component}: {message}")]
    Critical {
        component: &'static str,
        message: String,
    },

    /// A spawned task failed to complete.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A convenient Result type for log tracker operations.
pub type Result<T> = std::result::Result<T, Error>;
