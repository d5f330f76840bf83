//! WriteDispatcher: fire-and-forget create/set/update/delete.
//!
//! Every call returns as soon as the write is spawned on the runtime. The
//! outcome is never reported to the caller: success shows up through the
//! store's own pushes to live bindings, failure is published once to the
//! [`ErrorEmitter`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::{
    error::StoreError,
    reactive::{emitter::ErrorEmitter, event::ErrorEvent},
    store::traits::DocumentStore,
    types::{CollectionPath, DocPath, Operation, SetOptions},
};

/// The mutation carried by a [`PendingWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Set(SetOptions),
    Update,
    Delete,
}

impl WriteOp {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create => Operation::Create,
            Self::Set(_) => Operation::Write,
            Self::Update => Operation::Update,
            Self::Delete => Operation::Delete,
        }
    }
}

/// A write in flight. Exists only for the duration of the background call.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub op: WriteOp,
    pub target: DocPath,
    pub payload: Option<Value>,
}

impl PendingWrite {
    async fn apply(&self, store: &dyn DocumentStore) -> Result<(), StoreError> {
        let payload = || self.payload.clone().unwrap_or(Value::Null);
        match self.op {
            WriteOp::Create => store.create(&self.target, payload()).await,
            WriteOp::Set(opts) => store.set(&self.target, payload(), opts).await,
            WriteOp::Update => store.update(&self.target, payload()).await,
            WriteOp::Delete => store.delete(&self.target).await,
        }
    }
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Decrements the in-flight count even if the write task panics or is
/// dropped by a shutting-down runtime.
struct FinishGuard(Arc<InFlight>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

#[derive(Clone)]
pub struct WriteDispatcher {
    store: Arc<dyn DocumentStore>,
    errors: Arc<ErrorEmitter>,
    runtime: Handle,
    in_flight: Arc<InFlight>,
}

impl WriteDispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, errors: Arc<ErrorEmitter>, runtime: Handle) -> Self {
        Self {
            store,
            errors,
            runtime,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Create a document with a fresh client-side id in `collection`.
    /// Returns the new document's path immediately.
    pub fn create(&self, collection: &CollectionPath, payload: Value) -> DocPath {
        // A hyphenated v4 uuid is never empty and never contains '/'.
        let target = collection.child(&uuid::Uuid::new_v4().to_string());
        self.dispatch(PendingWrite {
            op: WriteOp::Create,
            target: target.clone(),
            payload: Some(payload),
        });
        target
    }

    pub fn set(&self, doc: &DocPath, payload: Value, opts: SetOptions) {
        self.dispatch(PendingWrite {
            op: WriteOp::Set(opts),
            target: doc.clone(),
            payload: Some(payload),
        });
    }

    pub fn update(&self, doc: &DocPath, patch: Value) {
        self.dispatch(PendingWrite {
            op: WriteOp::Update,
            target: doc.clone(),
            payload: Some(patch),
        });
    }

    pub fn delete(&self, doc: &DocPath) {
        self.dispatch(PendingWrite {
            op: WriteOp::Delete,
            target: doc.clone(),
            payload: None,
        });
    }

    /// Spawn `write` and return.
    pub fn dispatch(&self, write: PendingWrite) {
        let store = Arc::clone(&self.store);
        let errors = Arc::clone(&self.errors);
        self.in_flight.begin();
        let guard = FinishGuard(Arc::clone(&self.in_flight));

        self.runtime.spawn(async move {
            let _guard = guard;
            if let Err(err) = write.apply(store.as_ref()).await {
                let operation = write.op.operation();
                tracing::warn!(
                    operation = %operation,
                    target = %write.target,
                    error = %err,
                    "background write failed"
                );
                let event =
                    ErrorEvent::from_store_error(&err, operation, write.target.as_str(), write.payload);
                errors.emit(&event);
            }
        });
    }

    /// Number of dispatched writes that have not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolve once no writes are in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
