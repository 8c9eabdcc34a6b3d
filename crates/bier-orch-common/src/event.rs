//! Synchronous event bus.
//!
//! Handlers are stored per event name and run in registration order on the
//! thread that triggers the event. Dispatch holds a re-entrant lock, so a
//! handler may trigger further events; those nested dispatches complete
//! before the outer one continues.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::{ReentrantMutex, RwLock};

use crate::error::EventError;
use crate::orch::Controller;

/// An event that can travel over the bus.
pub trait BusEvent {
    /// The name handlers subscribe to.
    fn name(&self) -> &'static str;
}

/// A registered callback.
pub type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a handler for [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dispatches events to subscribed handlers.
///
/// A new bus is inactive: [`trigger`](Self::trigger) does nothing until
/// [`activate`](Self::activate) is called, which lets every subscriber
/// register before the first event is delivered.
pub struct EventBus<E> {
    dispatch: ReentrantMutex<()>,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler<E>)>>>,
    active: AtomicBool,
    next_id: AtomicU64,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            dispatch: ReentrantMutex::new(()),
            handlers: RwLock::new(HashMap::new()),
            active: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stops delivery and drops every subscription.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.handlers.write().clear();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Subscribes `handler` to `event`.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Subscribes `controller` to every event it lists.
    pub fn register_controller<C>(&self, controller: Arc<C>) -> Vec<HandlerId>
    where
        C: Controller<E> + 'static,
        E: 'static,
    {
        controller
            .subscriptions()
            .iter()
            .map(|event| {
                let c = Arc::clone(&controller);
                debug!("{} subscribes to {}", c.name(), event);
                self.on(event, move |e| c.handle(e))
            })
            .collect()
    }

    /// Removes one handler from `event`.
    pub fn off(&self, event: &str, id: HandlerId) -> Result<(), EventError> {
        let mut handlers = self.handlers.write();
        let list = handlers
            .get_mut(event)
            .ok_or_else(|| EventError::EventNotFound {
                event: event.to_string(),
            })?;
        let pos = list
            .iter()
            .position(|(hid, _)| *hid == id)
            .ok_or_else(|| EventError::HandlerNotFound {
                event: event.to_string(),
                id: id.as_u64(),
            })?;
        list.remove(pos);
        Ok(())
    }

    /// Removes every handler from `event`.
    pub fn off_all(&self, event: &str) -> Result<(), EventError> {
        self.handlers
            .write()
            .remove(event)
            .map(|_| ())
            .ok_or_else(|| EventError::EventNotFound {
                event: event.to_string(),
            })
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Delivers `event` to its handlers.
    ///
    /// Returns false if the bus is inactive or nobody is subscribed. A
    /// failing or panicking handler is logged and the remaining handlers
    /// still run.
    pub fn trigger(&self, event: &E) -> bool {
        if !self.is_active() {
            return false;
        }

        let name = event.name();
        let _guard = self.dispatch.lock();

        // Snapshot so handlers may subscribe or unsubscribe while running.
        let callbacks: Vec<(HandlerId, Handler<E>)> = match self.handlers.read().get(name) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return false,
        };

        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Handler {} for {} failed: {:#}", id, name, e),
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Handler {} for {} panicked: {}", id, name, msg);
                }
            }
        }
        true
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
