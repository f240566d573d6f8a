//! Typed event routing
//!
//! The transport hands every decoded frame to one router; consumers
//! register per-event-kind handlers and get each matching event exactly
//! once, in registration order. There is no replay: a handler registered
//! after an event fires never sees it.
//!
//! Subscriptions are identified by opaque tokens, so two subscribers using
//! the same closure body can still be removed independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::frame::{EventKind, Frame};

// ----------------------------------------------------------------------------
// Subscription Id
// ----------------------------------------------------------------------------

/// Opaque token returned by `on`, consumed by `off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Event Router
// ----------------------------------------------------------------------------

type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Fan-out point between the transport and everything listening to it
///
/// `emit` snapshots the matching handler list before invoking it, so
/// handlers may freely register or remove subscriptions (including their
/// own) while an event is being delivered. A handler removed mid-delivery
/// may still see the in-flight event; one added mid-delivery only sees
/// later events.
pub struct EventRouter {
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.lock();
        handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver a frame to every handler registered for its kind
    ///
    /// Returns how many handlers ran. Unregistered kinds (including unknown
    /// event names) deliver to zero handlers and are not an error.
    pub fn emit(&self, frame: &Frame) -> usize {
        let snapshot: Vec<Handler> = {
            let handlers = self.lock();
            handlers
                .get(&frame.kind)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &snapshot {
            handler(frame);
        }
        snapshot.len()
    }

    /// Number of live subscriptions for one event kind
    pub fn subscriber_count(&self, kind: &EventKind) -> usize {
        self.lock().get(kind).map(Vec::len).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<(SubscriptionId, Handler)>>> {
        match self.handlers.lock() {
            Ok(guard) => guard,
            // a handler never runs under the lock, so a poisoned map is
            // still structurally sound
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers = self.lock();
        let subs: usize = handlers.values().map(Vec::len).sum();
        f.debug_struct("EventRouter")
            .field("kinds", &handlers.len())
            .field("subscriptions", &subs)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
