//! Ordered, typed publish/subscribe queue with a single dispatch loop.
//!
//! Producers on any thread [`post`](EventSender::post) values onto an
//! unbounded FIFO. [`EventBus::run`] drains it on the async side and calls the
//! subscribers registered for each value's concrete type, in registration
//! order, before taking the next value.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

const COMPONENT: &str = "EventBus";

/// Callback invoked for every dispatched value of type `T`.
pub type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Envelope {
    Event {
        type_id: TypeId,
        type_name: &'static str,
        value: Box<dyn Any + Send>,
    },
    Stop,
}

struct Registration {
    // The `Subscriber<T>` as registered, kept for identity on unregister.
    callback: Box<dyn Any + Send + Sync>,
    invoke: Arc<dyn Fn(&dyn Any) + Send + Sync>,
}

/// Cloneable, thread-safe handle that can only post to the bus.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
    /// Enqueues `value` for dispatch. Never blocks.
    pub fn post<T: Any + Send>(&self, value: T) {
        let envelope = Envelope::Event {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        };
        if self.tx.send(envelope).is_err() {
            tracing::warn!(
                event = std::any::type_name::<T>(),
                "event bus dropped, event discarded"
            );
        }
    }

    /// Enqueues the stop sentinel; the dispatch loop exits when it reaches it.
    pub fn stop(&self) {
        let _ = self.tx.send(Envelope::Stop);
    }
}

pub struct EventBus {
    sender: EventSender,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    registry: Mutex<HashMap<TypeId, Vec<Registration>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: EventSender { tx },
            receiver: tokio::sync::Mutex::new(rx),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for producers living on other threads.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn post<T: Any + Send>(&self, value: T) {
        self.sender.post(value);
    }

    /// Posts the stop sentinel behind everything already queued.
    pub fn stop(&self) {
        self.sender.stop();
    }

    /// Appends `callback` to the subscribers of `T`. Duplicates are allowed
    /// and are invoked once per registration.
    pub fn register<T: Any>(&self, callback: Subscriber<T>) {
        let target = Arc::clone(&callback);
        let invoke: Arc<dyn Fn(&dyn Any) + Send + Sync> = Arc::new(move |value: &dyn Any| {
            if let Some(value) = value.downcast_ref::<T>() {
                target(value);
            }
        });

        self.registry
            .lock()
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Registration {
                callback: Box::new(callback),
                invoke,
            });
    }

    /// Removes the first registration of `callback` for `T`.
    /// Returns whether one was found.
    pub fn unregister<T: Any>(&self, callback: &Subscriber<T>) -> bool {
        self.remove_matching(callback, false) > 0
    }

    /// Removes every registration of `callback` for `T` and returns how many.
    pub fn unregister_all<T: Any>(&self, callback: &Subscriber<T>) -> usize {
        self.remove_matching(callback, true)
    }

    /// Number of registrations for `T`.
    pub fn subscriber_count<T: Any>(&self) -> usize {
        self.registry
            .lock()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }

    /// Whether any type has a registration entry.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Dispatch loop. Returns once the stop sentinel is dequeued.
    ///
    /// Only one loop may run at a time; a concurrent call fails with
    /// `AlreadyStarted`. The loop can be started again after it returns.
    pub async fn run(&self) -> Result<()> {
        let mut receiver = self
            .receiver
            .try_lock()
            .map_err(|_| Error::AlreadyStarted {
                component: COMPONENT,
            })?;

        tracing::debug!("event dispatch loop started");
        while let Some(envelope) = receiver.recv().await {
            match envelope {
                Envelope::Stop => break,
                Envelope::Event {
                    type_id,
                    type_name,
                    value,
                } => self.dispatch(type_id, type_name, &*value),
            }
        }
        tracing::debug!("event dispatch loop stopped");
        Ok(())
    }

    fn dispatch(&self, type_id: TypeId, type_name: &'static str, value: &dyn Any) {
        // Snapshot so subscribers may (un)register without deadlocking.
        let subscribers: Vec<_> = match self.registry.lock().get(&type_id) {
            Some(registrations) => registrations
                .iter()
                .map(|r| Arc::clone(&r.invoke))
                .collect(),
            None => Vec::new(),
        };

        if subscribers.is_empty() {
            tracing::trace!(event = type_name, "no subscriber");
            return;
        }
        for invoke in subscribers {
            invoke(value);
        }
    }

    fn remove_matching<T: Any>(&self, callback: &Subscriber<T>, all: bool) -> usize {
        let type_id = TypeId::of::<T>();
        let mut registry = self.registry.lock();
        let Some(registrations) = registry.get_mut(&type_id) else {
            return 0;
        };

        let mut removed = 0;
        registrations.retain(|registration| {
            if removed > 0 && !all {
                return true;
            }
            let matches = registration
                .callback
                .downcast_ref::<Subscriber<T>>()
                .is_some_and(|registered| Arc::ptr_eq(registered, callback));
            if matches {
                removed += 1;
            }
            !matches
        });

        if registrations.is_empty() {
            registry.remove(&type_id);
        }
        removed
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
