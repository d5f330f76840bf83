//! MemoryStore: in-process [`DocumentStore`] with live subscriptions.
//!
//! Used as the backend for tests and local demos. It evaluates collection
//! queries with [`crate::query::execute`], enforces an optional access rule,
//! and exposes a few controls that a hosted store does not:
//!
//!   - `set_auto_deliver(false)` queues snapshots until [`MemoryStore::flush`],
//!     which makes the `Loading` phase of a binding observable.
//!   - `hold_writes()` / `release_writes()` park every write before it is
//!     applied, which makes fire-and-forget dispatch observable.
//!   - `revoke(path)` terminates the subscriptions on a path with a
//!     permission failure, as a server does when access rules change.
//!
//! Access rules are invoked under the store lock and must not call back into
//! the store. Subscriber callbacks are always invoked with no lock held.
//!
//! Snapshots are taken under the lock and appended to one outbox in the order
//! the writes were applied. A single thread at a time drains the outbox, so a
//! subscriber never receives an older snapshot after a newer one.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    error::StoreError,
    query::{execute::execute, types::QueryDescriptor},
    types::{DocPath, Document, Operation, SetOptions, Unsubscribe},
};

use super::traits::{DataCallback, DocumentStore, ErrorCallback, StoreData};

/// Access rule: return `true` to allow `operation` on `path`.
pub type AccessRule = dyn Fn(Operation, &str) -> bool + Send + Sync;

/// Counters for asserting on store traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub subscriptions_opened: usize,
    pub subscriptions_cancelled: usize,
    pub reads: usize,
    pub writes_started: usize,
    pub writes_applied: usize,
}

struct Sub {
    id: u64,
    query: QueryDescriptor,
    on_data: DataCallback,
    on_error: ErrorCallback,
}

enum Delivery {
    Data(Arc<Sub>, StoreData),
    Failure(Arc<Sub>, StoreError),
}

struct MemoryState {
    docs: BTreeMap<DocPath, Value>,
    subs: Vec<Arc<Sub>>,
    queued: Vec<(Arc<Sub>, StoreData)>,
    outbox: VecDeque<Delivery>,
    delivering: bool,
    auto_deliver: bool,
    next_id: u64,
    rule: Option<Arc<AccessRule>>,
    offline: Option<String>,
    stats: StoreStats,
}

impl MemoryState {
    fn check(&self, operation: Operation, path: &str) -> Result<(), StoreError> {
        if let Some(reason) = &self.offline {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        if let Some(rule) = &self.rule {
            if !rule(operation, path) {
                return Err(StoreError::permission_denied(operation, path));
            }
        }
        Ok(())
    }

    fn snapshot(&self, query: &QueryDescriptor) -> StoreData {
        match query {
            QueryDescriptor::Document(doc) => StoreData::Document(
                self.docs
                    .get(doc.path())
                    .map(|data| Document::new(doc.path().clone(), data.clone())),
            ),
            QueryDescriptor::Collection(q) => {
                let docs = self
                    .docs
                    .iter()
                    .filter(|(path, _)| q.collection().contains(path))
                    .map(|(path, data)| Document::new(path.clone(), data.clone()));
                StoreData::Documents(execute(docs, q))
            }
        }
    }

    fn is_active(&self, sub: &Sub) -> bool {
        self.subs.iter().any(|s| s.id == sub.id)
    }

    /// Snapshots owed to subscribers after `path` changed. They go to the
    /// outbox, or are held back when auto-delivery is off.
    fn changed(&mut self, path: &DocPath) {
        let affected: Vec<(Arc<Sub>, StoreData)> = self
            .subs
            .iter()
            .filter(|sub| match &sub.query {
                QueryDescriptor::Document(doc) => doc.path() == path,
                QueryDescriptor::Collection(q) => q.collection().contains(path),
            })
            .map(|sub| (Arc::clone(sub), self.snapshot(&sub.query)))
            .collect();

        if self.auto_deliver {
            self.outbox
                .extend(affected.into_iter().map(|(sub, data)| Delivery::Data(sub, data)));
        } else {
            self.queued.extend(affected);
        }
    }
}

fn read_operation(query: &QueryDescriptor) -> Operation {
    match query {
        QueryDescriptor::Document(_) => Operation::Get,
        QueryDescriptor::Collection(_) => Operation::List,
    }
}

/// Drain the outbox unless another thread already is.
fn deliver(state: &Mutex<MemoryState>) {
    {
        let mut st = state.lock();
        if st.delivering {
            return;
        }
        st.delivering = true;
    }
    loop {
        let next = {
            let mut st = state.lock();
            loop {
                match st.outbox.pop_front() {
                    // Cancelled subscriptions receive nothing further.
                    Some(Delivery::Data(sub, _)) if !st.is_active(&sub) => continue,
                    Some(delivery) => break Some(delivery),
                    None => {
                        st.delivering = false;
                        break None;
                    }
                }
            }
        };
        let outcome = match next {
            Some(Delivery::Data(sub, data)) => {
                catch_unwind(AssertUnwindSafe(|| (sub.on_data)(data)))
            }
            Some(Delivery::Failure(sub, error)) => {
                catch_unwind(AssertUnwindSafe(|| (sub.on_error)(error)))
            }
            None => return,
        };
        if outcome.is_err() {
            tracing::error!("store subscriber panicked; continuing");
        }
    }
}

/// Shallow-merge `patch` into `base` when both are objects; otherwise replace.
fn merge_into(base: Option<Value>, patch: Value) -> Value {
    match (base, patch) {
        (Some(Value::Object(mut existing)), Value::Object(fields)) => {
            for (k, v) in fields {
                existing.insert(k, v);
            }
            Value::Object(existing)
        }
        (_, patch) => patch,
    }
}

fn require_object(doc: &DocPath, payload: &Value) -> Result<(), StoreError> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidPayload {
            path: doc.to_string(),
            reason: "document payloads must be JSON objects".to_string(),
        })
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    write_gate: watch::Sender<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (write_gate, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                docs: BTreeMap::new(),
                subs: Vec::new(),
                queued: Vec::new(),
                outbox: VecDeque::new(),
                delivering: false,
                auto_deliver: true,
                next_id: 1,
                rule: None,
                offline: None,
                stats: StoreStats::default(),
            })),
            write_gate,
        }
    }

    // -----------------------------------------------------------------------
    // Direct access
    // -----------------------------------------------------------------------

    /// Write `data` at `path` immediately, bypassing rules and the write gate.
    /// Subscribers are notified as for any other write.
    pub fn insert(&self, path: &DocPath, data: Value) {
        {
            let mut st = self.state.lock();
            st.docs.insert(path.clone(), data);
            st.changed(path);
        }
        deliver(&self.state);
    }

    /// Current data at `path`, if any.
    pub fn get(&self, path: &DocPath) -> Option<Value> {
        self.state.lock().docs.get(path).cloned()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.state.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats
    }

    /// Number of subscriptions currently open.
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().subs.len()
    }

    // -----------------------------------------------------------------------
    // Controls
    // -----------------------------------------------------------------------

    pub fn set_rule(&self, rule: impl Fn(Operation, &str) -> bool + Send + Sync + 'static) {
        self.state.lock().rule = Some(Arc::new(rule));
    }

    pub fn clear_rule(&self) {
        self.state.lock().rule = None;
    }

    /// While `Some`, every operation fails with `Unavailable(reason)`.
    pub fn set_offline(&self, reason: Option<String>) {
        self.state.lock().offline = reason;
    }

    /// When `false`, snapshots are queued until [`flush`](Self::flush).
    pub fn set_auto_deliver(&self, auto: bool) {
        self.state.lock().auto_deliver = auto;
    }

    /// Deliver every queued snapshot in order. Returns how many were
    /// delivered; snapshots for subscriptions cancelled meanwhile are dropped.
    pub fn flush(&self) -> usize {
        let n = {
            let mut st = self.state.lock();
            let queued: Vec<(Arc<Sub>, StoreData)> = st.queued.drain(..).collect();
            let before = st.outbox.len();
            for (sub, data) in queued {
                if st.is_active(&sub) {
                    st.outbox.push_back(Delivery::Data(sub, data));
                }
            }
            st.outbox.len() - before
        };
        deliver(&self.state);
        n
    }

    /// Park all writes before they are applied.
    pub fn hold_writes(&self) {
        self.write_gate.send_replace(true);
    }

    /// Let parked and future writes proceed.
    pub fn release_writes(&self) {
        self.write_gate.send_replace(false);
    }

    /// Terminate every subscription targeting `path` with a permission
    /// failure. Returns how many were terminated.
    pub fn revoke(&self, path: &str) -> usize {
        let n = {
            let mut st = self.state.lock();
            let (hit, keep): (Vec<Arc<Sub>>, Vec<Arc<Sub>>) = st
                .subs
                .drain(..)
                .partition(|s| s.query.target_path() == path);
            st.subs = keep;
            let hit_ids: Vec<u64> = hit.iter().map(|s| s.id).collect();
            st.queued.retain(|(s, _)| !hit_ids.contains(&s.id));
            let n = hit.len();
            for sub in hit {
                let error = StoreError::permission_denied(read_operation(&sub.query), path);
                st.outbox.push_back(Delivery::Failure(sub, error));
            }
            n
        };
        deliver(&self.state);
        n
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn wait_for_gate(&self) {
        let mut rx = self.write_gate.subscribe();
        // The sender lives as long as `self`, so this only returns once open.
        let _ = rx.wait_for(|held| !*held).await;
    }

    async fn run_write(
        &self,
        operation: Operation,
        doc: &DocPath,
        apply: impl FnOnce(&mut BTreeMap<DocPath, Value>) -> Result<(), StoreError> + Send,
    ) -> Result<(), StoreError> {
        self.state.lock().stats.writes_started += 1;
        self.wait_for_gate().await;

        {
            let mut st = self.state.lock();
            st.check(operation, doc.as_str())?;
            apply(&mut st.docs)?;
            st.stats.writes_applied += 1;
            st.changed(doc);
        }
        deliver(&self.state);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_sub(state: &Weak<Mutex<MemoryState>>, id: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut st = state.lock();
    let before = st.subs.len();
    st.subs.retain(|s| s.id != id);
    if st.subs.len() != before {
        st.stats.subscriptions_cancelled += 1;
    }
    st.queued.retain(|(s, _)| s.id != id);
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn subscribe(
        &self,
        query: &QueryDescriptor,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Unsubscribe {
        let outcome = {
            let mut st = self.state.lock();
            st.stats.subscriptions_opened += 1;
            match st.check(read_operation(query), query.target_path()) {
                Err(e) => Err(e),
                Ok(()) => {
                    let id = st.next_id;
                    st.next_id += 1;
                    let sub = Arc::new(Sub {
                        id,
                        query: query.clone(),
                        on_data,
                        on_error: Arc::clone(&on_error),
                    });
                    st.subs.push(Arc::clone(&sub));
                    let initial = st.snapshot(query);
                    if st.auto_deliver {
                        st.outbox.push_back(Delivery::Data(sub, initial));
                    } else {
                        st.queued.push((sub, initial));
                    }
                    Ok(id)
                }
            }
        };

        match outcome {
            Err(e) => {
                on_error(e);
                Box::new(|| {})
            }
            Ok(id) => {
                deliver(&self.state);
                let state = Arc::downgrade(&self.state);
                Box::new(move || cancel_sub(&state, id))
            }
        }
    }

    async fn get_once(&self, query: &QueryDescriptor) -> Result<StoreData, StoreError> {
        let mut st = self.state.lock();
        st.stats.reads += 1;
        st.check(read_operation(query), query.target_path())?;
        Ok(st.snapshot(query))
    }

    async fn create(&self, doc: &DocPath, payload: Value) -> Result<(), StoreError> {
        require_object(doc, &payload)?;
        self.run_write(Operation::Create, doc, |docs| {
            if docs.contains_key(doc) {
                return Err(StoreError::AlreadyExists {
                    path: doc.to_string(),
                });
            }
            docs.insert(doc.clone(), payload);
            Ok(())
        })
        .await
    }

    async fn set(
        &self,
        doc: &DocPath,
        payload: Value,
        opts: SetOptions,
    ) -> Result<(), StoreError> {
        require_object(doc, &payload)?;
        self.run_write(Operation::Write, doc, |docs| {
            let next = if opts.merge {
                merge_into(docs.remove(doc), payload)
            } else {
                payload
            };
            docs.insert(doc.clone(), next);
            Ok(())
        })
        .await
    }

    async fn update(&self, doc: &DocPath, patch: Value) -> Result<(), StoreError> {
        require_object(doc, &patch)?;
        self.run_write(Operation::Update, doc, |docs| {
            let Some(existing) = docs.remove(doc) else {
                return Err(StoreError::NotFound {
                    path: doc.to_string(),
                });
            };
            docs.insert(doc.clone(), merge_into(Some(existing), patch));
            Ok(())
        })
        .await
    }

    async fn delete(&self, doc: &DocPath) -> Result<(), StoreError> {
        self.run_write(Operation::Delete, doc, |docs| {
            docs.remove(doc);
            Ok(())
        })
        .await
    }
}
