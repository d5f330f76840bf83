//! Tests for `SubscriptionCache`: sharing, lifecycle and failure handling.

use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use fin_store::error::{ErrorKind, StoreError};
use fin_store::query::{CollectionQuery, FilterOp, QueryDescriptor, UserCollection, UserScope};
use fin_store::reactive::{BindingView, ErrorEmitter, ErrorEvent, SubscriptionCache};
use fin_store::store::{DataCallback, DocumentStore, ErrorCallback, MemoryStore, StoreData};
use fin_store::types::{DocPath, Operation, SetOptions, Unsubscribe};
use fin_store::ClientOptions;
use parking_lot::Mutex;
use serde_json::{json, Value};

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    errors: Arc<ErrorEmitter>,
    cache: SubscriptionCache,
}

fn harness_with(options: ClientOptions) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let errors = Arc::new(ErrorEmitter::new());
    let dyn_store: Arc<dyn DocumentStore> = store.clone();
    let cache = SubscriptionCache::new(dyn_store, Arc::clone(&errors), &options);
    Harness {
        store,
        errors,
        cache,
    }
}

fn harness() -> Harness {
    harness_with(ClientOptions::default())
}

fn scope() -> UserScope {
    UserScope::new("u1").unwrap()
}

fn expenses() -> QueryDescriptor {
    scope()
        .collection(UserCollection::Transactions)
        .where_field("type", FilterOp::Eq, "expense")
        .into()
}

fn txn(id: &str) -> DocPath {
    scope()
        .collection_path(UserCollection::Transactions)
        .doc(id)
        .unwrap()
}

type ViewLog = Arc<Mutex<Vec<BindingView<StoreData>>>>;

fn make_log<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn recorder(log: &ViewLog) -> impl Fn(&BindingView<StoreData>) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |view: &BindingView<StoreData>| log.lock().push(view.clone())
}

/// Run `f` on its own thread and report whether it returned within 2s.
fn finishes(f: impl FnOnce() + Send + 'static) -> bool {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        f();
        let _ = done_tx.send(());
    });
    done_rx.recv_timeout(Duration::from_secs(2)).is_ok()
}

fn record_events(errors: &ErrorEmitter) -> (Arc<Mutex<Vec<ErrorEvent>>>, Unsubscribe) {
    let log = make_log();
    let unsub = {
        let log = Arc::clone(&log);
        errors.on(move |e| log.lock().push(e.clone()))
    };
    (log, unsub)
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn equivalent_queries_share_one_subscription() {
    let h = harness();
    let a = h.cache.attach(&expenses(), |_| {});
    let b = h.cache.attach(&expenses(), |_| {});
    let c = h.cache.attach(&expenses(), |_| {});

    assert_eq!(h.store.stats().subscriptions_opened, 1);
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.subscriber_count(&expenses().key()), 3);
    assert_eq!(a.key(), b.key());
    assert_eq!(b.key(), c.key());
}

#[test]
fn filter_order_does_not_split_the_binding() {
    let h = harness();
    let col = scope().collection_path(UserCollection::Transactions);
    let q1: QueryDescriptor = CollectionQuery::new(col.clone())
        .where_field("type", FilterOp::Eq, "expense")
        .where_field("amount", FilterOp::Gt, 10)
        .into();
    let q2: QueryDescriptor = CollectionQuery::new(col)
        .where_field("amount", FilterOp::Gt, 10)
        .where_field("type", FilterOp::Eq, "expense")
        .into();

    let _a = h.cache.attach(&q1, |_| {});
    let _b = h.cache.attach(&q2, |_| {});
    assert_eq!(h.store.stats().subscriptions_opened, 1);
}

#[test]
fn different_queries_get_different_bindings() {
    let h = harness();
    let _a = h.cache.attach(&expenses(), |_| {});
    let _b = h
        .cache
        .attach(&scope().collection(UserCollection::Budgets).into(), |_| {});
    assert_eq!(h.store.stats().subscriptions_opened, 2);
    assert_eq!(h.cache.active_keys().len(), 2);
}

#[test]
fn every_consumer_sees_the_same_push() {
    let h = harness();
    let logs: Vec<ViewLog> = (0..3).map(|_| make_log()).collect();
    let _handles: Vec<_> = logs
        .iter()
        .map(|log| h.cache.attach(&expenses(), recorder(log)))
        .collect();

    h.store
        .insert(&txn("t1"), json!({ "type": "expense", "amount": 12 }));

    let last: Vec<BindingView<StoreData>> = logs
        .iter()
        .map(|log| log.lock().last().cloned().unwrap())
        .collect();
    assert_eq!(last[0].data.as_ref().map(StoreData::len), Some(1));
    assert_eq!(last[0], last[1]);
    assert_eq!(last[1], last[2]);
}

#[test]
fn late_consumer_reads_current_view() {
    let h = harness();
    h.store.insert(&txn("t1"), json!({ "type": "expense" }));
    let _first = h.cache.attach(&expenses(), |_| {});

    let late = h.cache.attach(&expenses(), |_| {});
    let view = late.view().unwrap();
    assert!(!view.is_loading);
    assert_eq!(view.data.map(|d| d.len()), Some(1));
}

#[test]
fn pushes_arrive_in_store_order() {
    let h = harness();
    let log = make_log();
    let _handle = h.cache.attach(&expenses(), recorder(&log));

    for n in 1..=3 {
        h.store
            .insert(&txn(&format!("t{n}")), json!({ "type": "expense" }));
    }

    let sizes: Vec<usize> = log
        .lock()
        .iter()
        .map(|v| v.data.as_ref().map_or(0, StoreData::len))
        .collect();
    assert_eq!(sizes, vec![0, 1, 2, 3]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn binding_is_loading_until_first_snapshot() {
    let h = harness();
    h.store.set_auto_deliver(false);
    let log = make_log();
    let handle = h.cache.attach(&expenses(), recorder(&log));

    assert_eq!(handle.view(), Some(BindingView::loading()));
    assert!(log.lock().is_empty());

    h.store.flush();
    let view = handle.view().unwrap().map(|d| d.len());
    assert_eq!(
        view,
        BindingView {
            data: Some(0),
            is_loading: false,
            error: None,
        }
    );
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn attach_during_setup_joins_the_pending_binding() {
    let h = harness();
    h.store.set_auto_deliver(false);
    let first_log = make_log();
    let second_log = make_log();

    let _first = h.cache.attach(&expenses(), recorder(&first_log));
    let _second = h.cache.attach(&expenses(), recorder(&second_log));
    assert_eq!(h.store.stats().subscriptions_opened, 1);

    h.store.flush();
    assert_eq!(first_log.lock().len(), 1);
    assert_eq!(second_log.lock().len(), 1);
}

#[test]
fn last_detach_cancels_exactly_once() {
    let h = harness();
    let a = h.cache.attach(&expenses(), |_| {});
    let b = h.cache.attach(&expenses(), |_| {});

    h.cache.detach(a);
    assert_eq!(h.store.stats().subscriptions_cancelled, 0);
    assert_eq!(h.cache.subscriber_count(&expenses().key()), 1);

    drop(b);
    assert_eq!(h.store.stats().subscriptions_cancelled, 1);
    assert!(h.cache.is_empty());
    assert_eq!(h.store.active_subscriptions(), 0);
}

#[test]
fn reattach_after_teardown_opens_a_fresh_binding() {
    let h = harness();
    h.store.insert(&txn("t1"), json!({ "type": "expense" }));
    drop(h.cache.attach(&expenses(), |_| {}));

    let log = make_log();
    let _again = h.cache.attach(&expenses(), recorder(&log));
    let stats = h.store.stats();
    assert_eq!(stats.subscriptions_opened, 2);
    assert_eq!(stats.subscriptions_cancelled, 1);
    assert_eq!(log.lock().len(), 1, "fresh binding delivers its own snapshot");
}

#[test]
fn stale_handle_does_not_release_a_newer_binding() {
    let h = harness();
    let old = h.cache.attach(&expenses(), |_| {});
    h.cache.close_all();
    assert!(old.view().is_none());

    let fresh = h.cache.attach(&expenses(), |_| {});
    drop(old);
    assert_eq!(h.cache.subscriber_count(fresh.key()), 1);
    assert_eq!(h.store.active_subscriptions(), 1);
}

#[test]
fn close_all_cancels_every_subscription() {
    let h = harness();
    let _a = h.cache.attach(&expenses(), |_| {});
    let _b = h
        .cache
        .attach(&scope().collection(UserCollection::Alerts).into(), |_| {});

    h.cache.close_all();
    assert!(h.cache.is_empty());
    assert_eq!(h.store.active_subscriptions(), 0);
    assert_eq!(h.store.stats().subscriptions_cancelled, 2);
}

/// Store wrapper that tears the cache down from inside `subscribe`, the way
/// a consumer unmounting on another thread would while setup is in flight.
struct ClosingStore {
    inner: Arc<MemoryStore>,
    cache: Mutex<Option<SubscriptionCache>>,
}

#[async_trait]
impl DocumentStore for ClosingStore {
    fn subscribe(
        &self,
        query: &QueryDescriptor,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Unsubscribe {
        let cancel = self.inner.subscribe(query, on_data, on_error);
        if let Some(cache) = self.cache.lock().take() {
            cache.close_all();
        }
        cancel
    }

    async fn get_once(&self, query: &QueryDescriptor) -> Result<StoreData, StoreError> {
        self.inner.get_once(query).await
    }

    async fn create(&self, doc: &DocPath, payload: Value) -> Result<(), StoreError> {
        self.inner.create(doc, payload).await
    }

    async fn set(&self, doc: &DocPath, payload: Value, opts: SetOptions) -> Result<(), StoreError> {
        self.inner.set(doc, payload, opts).await
    }

    async fn update(&self, doc: &DocPath, patch: Value) -> Result<(), StoreError> {
        self.inner.update(doc, patch).await
    }

    async fn delete(&self, doc: &DocPath) -> Result<(), StoreError> {
        self.inner.delete(doc).await
    }
}

#[test]
fn release_during_setup_cancels_when_subscribe_returns() {
    let inner = Arc::new(MemoryStore::new());
    let closing = Arc::new(ClosingStore {
        inner: Arc::clone(&inner),
        cache: Mutex::new(None),
    });
    let dyn_store: Arc<dyn DocumentStore> = closing.clone();
    let cache = SubscriptionCache::new(
        dyn_store,
        Arc::new(ErrorEmitter::new()),
        &ClientOptions::default(),
    );
    *closing.cache.lock() = Some(cache.clone());

    let handle = cache.attach(&expenses(), |_| {});

    assert!(cache.is_empty());
    assert!(handle.view().is_none());
    assert_eq!(inner.stats().subscriptions_opened, 1);
    assert_eq!(inner.stats().subscriptions_cancelled, 1);
    assert_eq!(inner.active_subscriptions(), 0);
}

#[test]
fn concurrent_attach_opens_one_subscription() {
    let h = harness();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = h.cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.attach(&expenses(), |_| {})
            })
        })
        .collect();
    let attached: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(h.store.stats().subscriptions_opened, 1);
    assert_eq!(h.cache.subscriber_count(&expenses().key()), 8);

    drop(attached);
    assert_eq!(h.store.stats().subscriptions_cancelled, 1);
}

#[test]
fn concurrent_pushes_leave_consumers_on_the_latest_view() {
    let h = harness();
    let seen = make_log();
    let _handle = {
        let seen = Arc::clone(&seen);
        h.cache.attach(&expenses(), move |view: &BindingView<StoreData>| {
            let n = view.data.as_ref().map_or(0, StoreData::len);
            if n == 1 {
                thread::sleep(Duration::from_millis(150));
            }
            seen.lock().push(n);
        })
    };

    let store = Arc::clone(&h.store);
    let first = thread::spawn(move || store.insert(&txn("t1"), json!({ "type": "expense" })));
    thread::sleep(Duration::from_millis(30));
    let store = Arc::clone(&h.store);
    let second = thread::spawn(move || store.insert(&txn("t2"), json!({ "type": "expense" })));
    first.join().unwrap();
    second.join().unwrap();

    assert_eq!(*seen.lock(), vec![0, 1, 2]);
    let current = h.cache.view(&expenses().key()).unwrap();
    assert_eq!(current.data.map(|d| d.len()), Some(2));
}

// ============================================================================
// Nested handles
// ============================================================================

fn budgets() -> QueryDescriptor {
    scope().collection(UserCollection::Budgets).into()
}

#[test]
fn dropping_a_consumer_that_owns_another_handle_completes() {
    let h = harness();
    let child = h.cache.attach(&budgets(), |_| {});
    let parent = h.cache.attach(&expenses(), move |_| {
        let _keep = &child;
    });

    assert!(finishes(move || drop(parent)));
    assert!(h.cache.is_empty());
    assert_eq!(h.store.active_subscriptions(), 0);
}

#[test]
fn detaching_one_of_several_consumers_releases_its_nested_handle() {
    let h = harness();
    let _sibling = h.cache.attach(&expenses(), |_| {});
    let child = h.cache.attach(&budgets(), |_| {});
    let parent = h.cache.attach(&expenses(), move |_| {
        let _keep = &child;
    });

    assert!(finishes(move || drop(parent)));
    assert_eq!(h.cache.active_keys(), vec![expenses().key()]);
    assert_eq!(h.cache.subscriber_count(&expenses().key()), 1);
    assert_eq!(h.store.active_subscriptions(), 1);
}

#[test]
fn close_all_with_nested_handles_completes() {
    let h = harness();
    let child = h.cache.attach(&budgets(), |_| {});
    let _parent = h.cache.attach(&expenses(), move |_| {
        let _keep = &child;
    });

    let cache = h.cache.clone();
    assert!(finishes(move || cache.close_all()));
    assert!(h.cache.is_empty());
    assert_eq!(h.store.active_subscriptions(), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn revoked_subscription_keeps_data_and_reports_permission_denied() {
    let h = harness();
    let (events, _unsub) = record_events(&h.errors);
    h.store.insert(&txn("t1"), json!({ "type": "expense" }));

    let log = make_log();
    let handle = h.cache.attach(&expenses(), recorder(&log));

    let target = scope()
        .collection_path(UserCollection::Transactions)
        .as_str()
        .to_string();
    assert_eq!(h.store.revoke(&target), 1);

    let view = handle.view().unwrap();
    assert_eq!(view.error, Some(ErrorKind::PermissionDenied));
    assert!(!view.is_loading);
    assert_eq!(view.data.map(|d| d.len()), Some(1));
    assert_eq!(log.lock().last().and_then(|v| v.error), Some(ErrorKind::PermissionDenied));

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ErrorKind::PermissionDenied);
    assert_eq!(events[0].context.operation, Operation::List);
    assert_eq!(events[0].context.target, target);
    assert_eq!(events[0].context.request_data, None);
}

#[test]
fn denied_subscription_surfaces_on_the_binding() {
    let h = harness();
    h.store.set_rule(|op, _| op != Operation::List);
    let (events, _unsub) = record_events(&h.errors);

    let handle = h.cache.attach(&expenses(), |_| {});
    let view = handle.view().unwrap();
    assert_eq!(view.error, Some(ErrorKind::PermissionDenied));
    assert!(view.data.is_none());
    assert_eq!(events.lock().len(), 1);
}

#[test]
fn read_errors_can_stay_off_the_emitter() {
    let h = harness_with(ClientOptions {
        emit_read_errors: Some(false),
        ..ClientOptions::default()
    });
    let (events, _unsub) = record_events(&h.errors);
    let handle = h.cache.attach(&expenses(), |_| {});

    let target = scope()
        .collection_path(UserCollection::Transactions)
        .as_str()
        .to_string();
    h.store.revoke(&target);

    assert_eq!(handle.view().unwrap().error, Some(ErrorKind::PermissionDenied));
    assert!(events.lock().is_empty());
}

#[test]
fn panicking_consumer_does_not_starve_the_others() {
    let h = harness();
    let log = make_log();
    let _bad = h.cache.attach(&expenses(), |view: &BindingView<StoreData>| {
        if view.data.as_ref().is_some_and(|d| !d.is_empty()) {
            panic!("consumer failure");
        }
    });
    let _good = h.cache.attach(&expenses(), recorder(&log));

    h.store.insert(&txn("t1"), json!({ "type": "expense" }));
    assert_eq!(
        log.lock().last().and_then(|v| v.data.as_ref().map(StoreData::len)),
        Some(1)
    );
}
