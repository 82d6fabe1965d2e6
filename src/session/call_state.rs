//! Call-state notifications and scoped subscriptions to them.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Telephony call state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallState {
    /// No call in progress; a session treats this as call end.
    Idle,
    Ringing,
    OffHook,
}

pub type CallStateHandler = Arc<dyn Fn(CallState) + Send + Sync>;

/// Source of call-state transitions.
pub trait CallStateMonitor: Send + Sync {
    /// Register `handler`. It stays registered until the returned
    /// subscription is dropped.
    fn subscribe(&self, handler: CallStateHandler) -> Subscription;
}

/// Registration guard. Dropping it unregisters the handler.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { unsubscribe: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: Vec<(u64, CallStateHandler)>,
}

/// In-process broadcaster of call states.
///
/// Handlers run on the publishing thread, outside the bus lock, so a
/// handler may drop its own subscription.
#[derive(Clone, Default)]
pub struct CallStateBus {
    inner: Arc<Mutex<BusInner>>,
}

impl CallStateBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `state` to every current subscriber.
    pub fn publish(&self, state: CallState) {
        let handlers: Vec<CallStateHandler> = match self.inner.lock() {
            Ok(inner) => inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => return,
        };
        debug!(?state, subscribers = handlers.len(), "call state published");
        for handler in handlers {
            handler(state);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.handlers.len()).unwrap_or(0)
    }
}

impl CallStateMonitor for CallStateBus {
    fn subscribe(&self, handler: CallStateHandler) -> Subscription {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.handlers.push((id, handler));
                id
            }
            Err(_) => return Subscription::detached(),
        };

        let weak: Weak<Mutex<BusInner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(bus) = weak.upgrade()
                && let Ok(mut inner) = bus.lock()
            {
                inner.handlers.retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }
}
