//! EventEmitter<T>: process-wide typed pub/sub, and the `ErrorEmitter`
//! built on it.
//!
//! Listeners are stored as `Arc<dyn Fn(&T)>` so snapshots are cheap.
//! Snapshot-on-emit semantics mean:
//!   - A listener removed *during* emission is still called in that round.
//!   - A listener added *during* emission is NOT called until the next emit.
//!
//! `emit` never panics on behalf of a listener: each call is isolated with
//! `catch_unwind` and a panicking listener is logged and skipped.
//!
//! The listener list lives behind its own `Arc` so the closure returned by
//! [`EventEmitter::on`] can remove its listener without borrowing the emitter.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::Unsubscribe;

use super::event::ErrorEvent;

/// Identifies one registered listener.
pub type ListenerId = u64;

/// Closure type for event listeners.
pub type ListenerFn<T> = dyn Fn(&T) + Send + Sync;

type Listeners<T> = Arc<Mutex<Vec<(ListenerId, Arc<ListenerFn<T>>)>>>;

pub struct EventEmitter<T> {
    listeners: Listeners<T>,
    next_id: AtomicU64,
}

/// The app-wide channel for structured failures.
pub type ErrorEmitter = EventEmitter<ErrorEvent>;

impl<T: 'static> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback`. The returned closure removes it; calling it more
    /// than once or after the emitter is gone is harmless.
    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));

        let listeners = Arc::downgrade(&self.listeners);
        Box::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                // The removed listener is dropped with the lock released.
                let mut list = listeners.lock();
                let removed = list.iter().position(|(lid, _)| *lid == id).map(|i| list.remove(i));
                drop(list);
                drop(removed);
            }
        })
    }

    /// Invoke every currently registered listener with `event`. Returns the
    /// number of listeners that ran to completion.
    pub fn emit(&self, event: &T) -> usize {
        // Snapshot Arc references under the lock, then release it so
        // callbacks can register or remove listeners.
        let snapshot: Vec<Arc<ListenerFn<T>>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        let mut delivered = 0;
        for cb in snapshot {
            match catch_unwind(AssertUnwindSafe(|| cb(event))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!("event listener panicked; continuing"),
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<T: 'static> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
