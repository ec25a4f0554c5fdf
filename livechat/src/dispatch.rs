//! Named-category handler registry with fault isolation.
//!
//! A [`Dispatcher`] routes each event to the handlers registered for the
//! event's category, in registration order. Handlers run outside of any lock
//! on a snapshot of the handler list, so they are free to subscribe or
//! unsubscribe while being dispatched to. A handler that returns an error or
//! panics does not affect its siblings: the fault is turned into an event for
//! the error category instead. Faults raised by error handlers are dropped.

use crate::error::Error;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A handler category for some event type.
pub trait Category: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Stable lowercase name, used in logs and fault reports.
    fn name(self) -> &'static str;
}

/// An event that can be routed through a [`Dispatcher`].
pub trait Dispatchable: Send + Sync + 'static {
    type Category: Category;

    /// The category that receives handler faults.
    const ERROR: Self::Category;

    fn category(&self) -> Self::Category;

    /// Wraps a handler fault as an event for [`Self::ERROR`].
    fn from_fault(fault: Error) -> Self;
}

type Handler<E> = Arc<dyn Fn(&E) -> eyre::Result<()> + Send + Sync>;

struct Registry<E: Dispatchable> {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<E::Category, Vec<(u64, Handler<E>)>>>,
}

impl<E: Dispatchable> Registry<E> {
    fn remove(&self, category: E::Category, id: u64) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&category) {
            list.retain(|(hid, _)| *hid != id);
            if list.is_empty() {
                handlers.remove(&category);
            }
        }
    }

    fn snapshot(&self, category: E::Category) -> Vec<Handler<E>> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }
}

/// Fan-out of events to handlers registered per category.
///
/// Cloning a `Dispatcher` yields another handle to the same registry.
pub struct Dispatcher<E: Dispatchable> {
    registry: Arc<Registry<E>>,
}

impl<E: Dispatchable> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Dispatchable> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Dispatchable> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self
            .registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<_> = handlers
            .iter()
            .map(|(category, list)| (category.name(), list.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

impl<E: Dispatchable> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers `handler` for `category`.
    ///
    /// The returned [`Subscription`] removes the handler again; it does not do
    /// so when dropped.
    pub fn subscribe<F>(&self, category: E::Category, handler: F) -> Subscription
    where
        F: Fn(&E) -> eyre::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::trace!(category = category.name(), id, "handler subscribed");

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(category, id);
                tracing::trace!(category = category.name(), id, "handler unsubscribed");
            }
        })
    }

    /// Number of handlers currently registered for `category`.
    pub fn handler_count(&self, category: E::Category) -> usize {
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler of its category, in registration order.
    pub fn dispatch(&self, event: E) {
        let category = event.category();
        let handlers = self.registry.snapshot(category);

        for handler in handlers {
            let Err(message) = invoke(&handler, &event) else {
                continue;
            };

            if category == E::ERROR {
                tracing::debug!(%message, "error handler failed, discarding fault");
                continue;
            }

            tracing::warn!(category = category.name(), %message, "handler failed");
            self.dispatch_fault(E::from_fault(Error::HandlerFault {
                category: category.name(),
                message,
            }));
        }
    }

    fn dispatch_fault(&self, fault: E) {
        for handler in self.registry.snapshot(E::ERROR) {
            if let Err(message) = invoke(&handler, &fault) {
                tracing::debug!(%message, "error handler failed, discarding fault");
            }
        }
    }
}

fn invoke<E>(handler: &Handler<E>, event: &E) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// A one-shot token that removes a registration.
///
/// Calling [`Subscription::unsubscribe`] more than once is harmless; only the
/// first call has an effect.
pub struct Subscription {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    pub fn unsubscribe(&self) {
        let remove = self
            .remove
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Whether [`Self::unsubscribe`] has not been called yet.
    pub fn is_active(&self) -> bool {
        self.remove
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
