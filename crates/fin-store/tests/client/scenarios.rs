//! End-to-end flows through `DataClient`.

use std::sync::Arc;

use fin_store::auth::StaticIdentity;
use fin_store::error::ErrorKind;
use fin_store::query::{FilterOp, QueryDescriptor, SortDirection, Target, UserCollection, UserScope};
use fin_store::reactive::{BindingView, ErrorEvent};
use fin_store::store::{DocumentStore, MemoryStore, StoreData};
use fin_store::types::{Operation, WithId};
use fin_store::{ClientOptions, DataClient};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Transaction {
    #[serde(rename = "type")]
    kind: String,
    amount: f64,
    date: String,
}

fn client() -> (Arc<MemoryStore>, DataClient) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn DocumentStore> = store.clone();
    let client = DataClient::new(dyn_store, ClientOptions::default()).unwrap();
    (store, client)
}

fn recent_expenses(scope: &UserScope) -> fin_store::query::CollectionQuery {
    scope
        .collection(UserCollection::Transactions)
        .where_field("type", FilterOp::Eq, "expense")
        .order_by("date", SortDirection::Desc)
        .limit(10)
}

#[tokio::test]
async fn dashboard_flow_from_sign_in_to_sign_out() {
    let (store, client) = client();
    let identity = StaticIdentity::new(None);
    let (events, _unsub) = {
        let log: Arc<Mutex<Vec<ErrorEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let unsub = client.errors().on(move |e| sink.lock().push(e.clone()));
        (log, unsub)
    };

    // Signed out: every widget is idle and nothing is subscribed.
    let mut list = client.use_collection::<Transaction>(
        Target::for_identity(&identity, recent_expenses),
        |_| {},
    );
    let mut chart = client.use_collection::<Transaction>(
        Target::for_identity(&identity, recent_expenses),
        |_| {},
    );
    assert_eq!(list.view(), BindingView::idle());
    assert_eq!(store.stats().subscriptions_opened, 0);

    // Sign in: both widgets bind to one shared subscription.
    identity.sign_in("u1");
    list.retarget(Target::for_identity(&identity, recent_expenses));
    chart.retarget(Target::for_identity(&identity, recent_expenses));
    assert_eq!(store.stats().subscriptions_opened, 1);
    assert_eq!(client.cache().len(), 1);
    assert_eq!(list.view().data, Some(Vec::new()));

    // Fire-and-forget writes show up through the live binding.
    let scope = UserScope::new("u1").unwrap();
    let txns = scope.collection_path(UserCollection::Transactions);
    client
        .writes()
        .create(&txns, json!({ "type": "expense", "amount": 18.5, "date": "2026-10-01" }));
    client
        .writes()
        .create(&txns, json!({ "type": "income", "amount": 3200, "date": "2026-10-02" }));
    client
        .writes()
        .create(&txns, json!({ "type": "expense", "amount": 64, "date": "2026-10-03" }));
    client.writes().wait_idle().await;

    let amounts: Vec<f64> = chart
        .view()
        .data
        .unwrap()
        .into_iter()
        .map(|t: WithId<Transaction>| t.data.amount)
        .collect();
    assert_eq!(amounts, vec![64.0, 18.5]);
    assert_eq!(list.view(), chart.view());

    // Sign out: widgets go idle and the subscription is released.
    identity.sign_out();
    list.retarget(Target::for_identity(&identity, recent_expenses));
    chart.retarget(Target::for_identity(&identity, recent_expenses));
    assert!(client.cache().is_empty());
    assert_eq!(store.active_subscriptions(), 0);
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn rejected_write_is_reported_once_and_the_app_keeps_running() {
    let (store, client) = client();
    let scope = UserScope::new("u1").unwrap();
    store.insert(
        scope.profile().path(),
        json!({ "displayName": "Ada", "currency": "EUR" }),
    );
    store.set_rule(|op, path| !(op == Operation::Update && path == "users/u1"));

    let events: Arc<Mutex<Vec<ErrorEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let _unsub = {
        let sink = Arc::clone(&events);
        client.errors().on(move |e| sink.lock().push(e.clone()))
    };
    let profile = client.use_document::<serde_json::Value>(Target::Ready(scope.profile()), |_| {});

    client
        .writes()
        .update(scope.profile().path(), json!({ "currency": "USD" }));
    client.writes().wait_idle().await;

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ErrorKind::PermissionDenied);
    assert_eq!(events[0].context.target, "users/u1");
    assert_eq!(events[0].context.request_data, Some(json!({ "currency": "USD" })));

    let view = profile.view();
    assert_eq!(view.error, None);
    assert_eq!(view.data.unwrap().data["currency"], json!("EUR"));
}

#[tokio::test]
async fn get_once_bypasses_the_cache() {
    let (store, client) = client();
    let scope = UserScope::new("u1").unwrap();
    store.insert(
        &scope.collection_path(UserCollection::Budgets).doc("b1").unwrap(),
        json!({ "limit": 100 }),
    );

    let query: QueryDescriptor = scope.collection(UserCollection::Budgets).into();
    let data = client.get_once(&query).await.unwrap();

    assert!(matches!(data, StoreData::Documents(ref docs) if docs.len() == 1));
    assert!(client.cache().is_empty());
    assert_eq!(store.stats().subscriptions_opened, 0);
}

#[tokio::test]
async fn shutdown_closes_bindings_and_drains_writes() {
    let (store, client) = client();
    let scope = UserScope::new("u1").unwrap();
    let hook = client.use_collection::<serde_json::Value>(
        Target::Ready(scope.collection(UserCollection::Challenges)),
        |_| {},
    );
    client
        .writes()
        .create(&scope.collection_path(UserCollection::Challenges), json!({ "goal": 5 }));

    client.shutdown().await;

    assert_eq!(store.active_subscriptions(), 0);
    assert_eq!(client.writes().in_flight(), 0);
    assert_eq!(store.len(), 1);
    assert_eq!(hook.view(), BindingView::idle());
}

#[test]
fn new_without_runtime_fails() {
    let dyn_store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    assert!(DataClient::new(dyn_store, ClientOptions::default()).is_err());
}

#[test]
fn with_runtime_works_outside_async_context() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn DocumentStore> = store.clone();
    let client = DataClient::with_runtime(dyn_store, ClientOptions::default(), runtime.handle().clone());

    let scope = UserScope::new("u1").unwrap();
    let path = client
        .writes()
        .create(&scope.collection_path(UserCollection::SavingGoals), json!({ "target": 500 }));
    runtime.block_on(client.writes().wait_idle());

    assert_eq!(store.get(&path), Some(json!({ "target": 500 })));
}
