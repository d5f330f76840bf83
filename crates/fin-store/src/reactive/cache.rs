//! SubscriptionCache: one store subscription per normalized query key,
//! shared by every consumer that asks for an equivalent query.
//!
//! # Threading model
//!
//! All binding state lives in one `Arc<parking_lot::Mutex<CacheState>>`.
//! The lock is never held while calling into the store, invoking or dropping
//! a consumer callback, running a cancel closure, or emitting an error event.
//! Store callbacks capture a `Weak` to the state, so a store that outlives
//! the cache simply stops delivering.
//!
//! # Delivery order
//!
//! Every change to a binding appends its view to the binding's outbox under
//! the lock. Whichever thread finds the outbox idle drains it, so consumers
//! see views in the order the changes were applied even when the store pushes
//! from several threads at once. A push that arrives while another thread is
//! draining returns immediately and is delivered by that thread.
//!
//! # Opening a binding
//!
//! `attach` registers the binding (state `Loading`) under the lock, then calls
//! `store.subscribe` outside it. A concurrent `attach` for the same key finds
//! the registered entry and joins it. If the last consumer detaches before
//! `subscribe` returns, the cancel closure is run as soon as it is available.
//!
//! Each binding carries a generation number. Callbacks and handles from a
//! torn-down binding never affect a later binding for the same key.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{
    config::ClientOptions,
    error::{ErrorKind, StoreError},
    query::{normalize::NormalizedKey, types::QueryDescriptor},
    store::traits::{DocumentStore, StoreData},
    types::{Operation, Unsubscribe},
};

use super::{
    binding::{BindingState, BindingView},
    emitter::ErrorEmitter,
    event::ErrorEvent,
};

/// Consumer callback, invoked after every change to the binding.
pub type ChangeFn = dyn Fn(&BindingView<StoreData>) + Send + Sync;

// ============================================================================
// Internal state
// ============================================================================

struct LiveBinding {
    generation: u64,
    state: BindingState,
    data: Option<StoreData>,
    error: Option<ErrorKind>,
    consumers: Vec<(u64, Arc<ChangeFn>)>,
    cancel: Option<Unsubscribe>,
    outbox: VecDeque<BindingView<StoreData>>,
    delivering: bool,
}

impl LiveBinding {
    fn view(&self) -> BindingView<StoreData> {
        BindingView::from_state(self.state, self.data.clone(), self.error)
    }

    fn callbacks(&self) -> Vec<Arc<ChangeFn>> {
        self.consumers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    /// Queue the current view. Returns `true` when the caller must drain.
    fn enqueue(&mut self) -> bool {
        let view = self.view();
        self.outbox.push_back(view);
        !std::mem::replace(&mut self.delivering, true)
    }
}

struct CacheState {
    bindings: HashMap<NormalizedKey, LiveBinding>,
    next_generation: u64,
    next_consumer: u64,
}

impl CacheState {
    fn live(&mut self, key: &NormalizedKey, generation: u64) -> Option<&mut LiveBinding> {
        self.bindings
            .get_mut(key)
            .filter(|b| b.generation == generation)
    }
}

fn notify(callbacks: Vec<Arc<ChangeFn>>, view: &BindingView<StoreData>) {
    for cb in callbacks {
        if catch_unwind(AssertUnwindSafe(|| cb(view))).is_err() {
            tracing::error!("binding consumer panicked; continuing");
        }
    }
}

/// Deliver queued views of one binding until its outbox is empty.
fn drain(state: &Mutex<CacheState>, key: &NormalizedKey, generation: u64) {
    loop {
        let (view, callbacks) = {
            let mut st = state.lock();
            let Some(binding) = st.live(key, generation) else {
                return;
            };
            match binding.outbox.pop_front() {
                Some(view) => (view, binding.callbacks()),
                None => {
                    binding.delivering = false;
                    return;
                }
            }
        };
        tracing::trace!(key = %key, consumers = callbacks.len(), "binding updated");
        notify(callbacks, &view);
    }
}

/// Drop one consumer. Cancels the store subscription when it was the last.
///
/// The detached callback and the closed binding are dropped after the lock
/// is released: a callback may own other handles whose drop re-enters here.
fn release(state: &Mutex<CacheState>, key: &NormalizedKey, generation: u64, consumer: u64) {
    let (_detached, closed) = {
        let mut st = state.lock();
        let Some(binding) = st.live(key, generation) else {
            return;
        };
        let detached = binding
            .consumers
            .iter()
            .position(|(id, _)| *id == consumer)
            .map(|i| binding.consumers.remove(i));
        let closed = if binding.consumers.is_empty() {
            st.bindings.remove(key)
        } else {
            None
        };
        (detached, closed)
    };
    let Some(mut closed) = closed else {
        return;
    };
    tracing::debug!(key = %key, generation, "closing live binding");
    if let Some(cancel) = closed.cancel.take() {
        cancel();
    }
}

// ============================================================================
// BindingHandle
// ============================================================================

/// A consumer's attachment to a live binding. Dropping it detaches.
pub struct BindingHandle {
    key: NormalizedKey,
    generation: u64,
    consumer: u64,
    state: Weak<Mutex<CacheState>>,
}

impl BindingHandle {
    pub fn key(&self) -> &NormalizedKey {
        &self.key
    }

    /// Current view of the binding, or `None` once it has been torn down
    /// by [`SubscriptionCache::close_all`].
    pub fn view(&self) -> Option<BindingView<StoreData>> {
        let state = self.state.upgrade()?;
        let mut st = state.lock();
        st.live(&self.key, self.generation).map(|b| b.view())
    }
}

impl Drop for BindingHandle {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            release(&state, &self.key, self.generation, self.consumer);
        }
    }
}

impl std::fmt::Debug for BindingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingHandle")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("consumer", &self.consumer)
            .finish()
    }
}

// ============================================================================
// SubscriptionCache
// ============================================================================

/// Sole owner of the store's live subscriptions. Cheap to clone; clones share
/// the same bindings.
#[derive(Clone)]
pub struct SubscriptionCache {
    store: Arc<dyn DocumentStore>,
    errors: Arc<ErrorEmitter>,
    state: Arc<Mutex<CacheState>>,
    emit_read_errors: bool,
}

impl SubscriptionCache {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        errors: Arc<ErrorEmitter>,
        options: &ClientOptions,
    ) -> Self {
        Self {
            store,
            errors,
            state: Arc::new(Mutex::new(CacheState {
                bindings: HashMap::new(),
                next_generation: 1,
                next_consumer: 1,
            })),
            emit_read_errors: options.emit_read_errors(),
        }
    }

    /// Attach a consumer to the binding for `query`, opening it if needed.
    ///
    /// `on_change` runs after every update of the binding. The consumer stays
    /// attached until the returned handle is dropped or passed to
    /// [`detach`](Self::detach).
    pub fn attach(
        &self,
        query: &QueryDescriptor,
        on_change: impl Fn(&BindingView<StoreData>) + Send + Sync + 'static,
    ) -> BindingHandle {
        let key = query.key();
        let callback: Arc<ChangeFn> = Arc::new(on_change);

        let (generation, consumer, opening) = {
            let mut st = self.state.lock();
            let consumer = st.next_consumer;
            st.next_consumer += 1;

            if let Some(binding) = st.bindings.get_mut(&key) {
                binding.consumers.push((consumer, callback));
                (binding.generation, consumer, false)
            } else {
                let generation = st.next_generation;
                st.next_generation += 1;
                st.bindings.insert(
                    key.clone(),
                    LiveBinding {
                        generation,
                        state: BindingState::Uninitialized,
                        data: None,
                        error: None,
                        consumers: vec![(consumer, callback)],
                        cancel: None,
                        outbox: VecDeque::new(),
                        delivering: false,
                    },
                );
                (generation, consumer, true)
            }
        };

        if opening {
            self.open(query, &key, generation);
        }

        BindingHandle {
            key,
            generation,
            consumer,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Detach a consumer now instead of at drop.
    pub fn detach(&self, handle: BindingHandle) {
        drop(handle);
    }

    fn open(&self, query: &QueryDescriptor, key: &NormalizedKey, generation: u64) {
        if let Some(binding) = self.state.lock().live(key, generation) {
            binding.state = BindingState::Loading;
        }
        tracing::debug!(key = %key, generation, "opening live binding");

        let on_data = {
            let state = Arc::downgrade(&self.state);
            let key = key.clone();
            Arc::new(move |data: StoreData| {
                let Some(state) = state.upgrade() else {
                    return;
                };
                let owner = {
                    let mut st = state.lock();
                    let Some(binding) = st.live(&key, generation) else {
                        return;
                    };
                    binding.data = Some(data);
                    binding.error = None;
                    binding.state = BindingState::Ready;
                    binding.enqueue()
                };
                if owner {
                    drain(&state, &key, generation);
                }
            })
        };

        let on_error = {
            let state = Arc::downgrade(&self.state);
            let key = key.clone();
            let errors = Arc::clone(&self.errors);
            let emit = self.emit_read_errors;
            let operation = match query {
                QueryDescriptor::Document(_) => Operation::Get,
                QueryDescriptor::Collection(_) => Operation::List,
            };
            let target = query.target_path().to_string();
            Arc::new(move |error: StoreError| {
                let Some(state) = state.upgrade() else {
                    return;
                };
                let owner = {
                    let mut st = state.lock();
                    let Some(binding) = st.live(&key, generation) else {
                        return;
                    };
                    binding.error = Some(error.kind());
                    binding.state = BindingState::Error;
                    binding.enqueue()
                };
                tracing::warn!(key = %key, error = %error, "live subscription failed");
                if owner {
                    drain(&state, &key, generation);
                }
                if emit {
                    errors.emit(&ErrorEvent::from_store_error(&error, operation, &target, None));
                }
            })
        };

        let cancel = self.store.subscribe(query, on_data, on_error);

        let orphaned = {
            let mut st = self.state.lock();
            match st.live(key, generation) {
                Some(binding) => {
                    binding.cancel = Some(cancel);
                    None
                }
                None => Some(cancel),
            }
        };
        if let Some(cancel) = orphaned {
            tracing::debug!(key = %key, generation, "binding released during setup");
            cancel();
        }
    }

    /// Current view for `key`, if a binding is live.
    pub fn view(&self, key: &NormalizedKey) -> Option<BindingView<StoreData>> {
        self.state.lock().bindings.get(key).map(LiveBinding::view)
    }

    /// Number of consumers attached to `key` (0 when no binding is live).
    pub fn subscriber_count(&self, key: &NormalizedKey) -> usize {
        self.state
            .lock()
            .bindings
            .get(key)
            .map_or(0, |b| b.consumers.len())
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.state.lock().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_keys(&self) -> Vec<NormalizedKey> {
        let mut keys: Vec<NormalizedKey> = self.state.lock().bindings.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Tear down every live binding and cancel its store subscription.
    /// Outstanding handles become inert.
    pub fn close_all(&self) {
        let closed: Vec<LiveBinding> = {
            let mut st = self.state.lock();
            st.bindings.drain().map(|(_, b)| b).collect()
        };
        tracing::debug!(count = closed.len(), "closing all live bindings");
        for mut binding in closed {
            if let Some(cancel) = binding.cancel.take() {
                cancel();
            }
        }
    }
}
