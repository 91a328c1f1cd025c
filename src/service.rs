//! Start/stop lifecycle for long-running, possibly blocking services.
//!
//! A [`BackgroundService`] supplies three hooks. [`ServiceRunner`] calls
//! `on_start` on the caller's thread so start-up failures surface immediately,
//! executes `run` on a dedicated named thread, and on `stop` calls `on_stop`
//! before joining that thread and handing back whatever `run` produced.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A service whose main body runs off the caller's thread.
pub trait BackgroundService: Send + Sync + 'static {
    /// Value produced by a successful `run`.
    type Output: Send + 'static;

    /// Name used for the worker thread and in lifecycle errors.
    fn name(&self) -> &'static str;

    /// Called synchronously by [`ServiceRunner::start`] before `run` is scheduled.
    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Main body. Runs on the worker thread until the service decides to exit.
    fn run(&self) -> Result<Self::Output>;

    /// Called synchronously by [`ServiceRunner::stop`] before joining `run`.
    /// Must make `run` return within a bounded time.
    fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Owns a service and the worker thread executing its `run`.
pub struct ServiceRunner<S: BackgroundService> {
    service: Arc<S>,
    worker: Option<JoinHandle<Result<S::Output>>>,
}

impl<S: BackgroundService> ServiceRunner<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
            worker: None,
        }
    }

    /// Shared handle to the wrapped service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Whether `start` succeeded and `stop` has not been called since.
    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Whether the worker has returned on its own (or was never started).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|worker| worker.is_finished())
    }

    /// Runs `on_start`, then spawns the worker thread executing `run`.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::AlreadyRunning {
                service: self.service.name(),
            });
        }

        self.service.on_start()?;

        let service = Arc::clone(&self.service);
        let worker = thread::Builder::new()
            .name(service.name().to_string())
            .spawn(move || service.run())?;

        tracing::debug!(service = self.service.name(), "worker thread spawned");
        self.worker = Some(worker);
        Ok(())
    }

    /// Runs `on_stop`, then blocks until `run` has returned and yields its result.
    pub fn stop(&mut self) -> Result<S::Output> {
        let Some(worker) = self.worker.take() else {
            return Err(Error::NotStarted {
                component: self.service.name(),
            });
        };

        if let Err(e) = self.service.on_stop() {
            // Still running; keep the handle so a later stop can join it.
            self.worker = Some(worker);
            return Err(e);
        }

        match worker.join() {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(service = self.service.name(), "worker thread panicked");
                Err(Error::ServicePanicked {
                    service: self.service.name(),
                })
            }
        }
    }
}
