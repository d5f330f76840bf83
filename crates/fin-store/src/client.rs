//! DataClient: the one explicitly-constructed instance of the data layer.
//!
//! Bundles the store, the error emitter, the subscription cache and the write
//! dispatcher so they can be passed to consumers as a unit. Tests create as
//! many isolated clients as they need.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use crate::{
    assist::{Assistant, TextGenerator},
    config::ClientOptions,
    error::{Result, StoreError},
    query::types::{CollectionQuery, DocumentRef, QueryDescriptor, Target},
    reactive::{
        binding::BindingView,
        cache::SubscriptionCache,
        emitter::ErrorEmitter,
        hooks::{use_collection, use_document, CollectionHook, DocumentHook},
    },
    store::traits::{DocumentStore, StoreData},
    types::WithId,
    writes::WriteDispatcher,
};

#[derive(Clone)]
pub struct DataClient {
    store: Arc<dyn DocumentStore>,
    errors: Arc<ErrorEmitter>,
    cache: SubscriptionCache,
    writes: WriteDispatcher,
    options: ClientOptions,
}

impl DataClient {
    /// Build a client that spawns background writes on the current tokio
    /// runtime.
    pub fn new(store: Arc<dyn DocumentStore>, options: ClientOptions) -> Result<Self> {
        Ok(Self::with_runtime(store, options, Handle::try_current()?))
    }

    pub fn with_runtime(
        store: Arc<dyn DocumentStore>,
        options: ClientOptions,
        runtime: Handle,
    ) -> Self {
        let errors = Arc::new(ErrorEmitter::new());
        let cache = SubscriptionCache::new(Arc::clone(&store), Arc::clone(&errors), &options);
        let writes = WriteDispatcher::new(Arc::clone(&store), Arc::clone(&errors), runtime);
        tracing::debug!(?options, "data client ready");
        Self {
            store,
            errors,
            cache,
            writes,
            options,
        }
    }

    pub fn errors(&self) -> &Arc<ErrorEmitter> {
        &self.errors
    }

    pub fn cache(&self) -> &SubscriptionCache {
        &self.cache
    }

    pub fn writes(&self) -> &WriteDispatcher {
        &self.writes
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn use_document<T>(
        &self,
        target: Target<DocumentRef>,
        on_change: impl Fn(&BindingView<WithId<T>>) + Send + Sync + 'static,
    ) -> DocumentHook<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        use_document(&self.cache, target, on_change)
    }

    pub fn use_collection<T>(
        &self,
        target: Target<CollectionQuery>,
        on_change: impl Fn(&BindingView<Vec<WithId<T>>>) + Send + Sync + 'static,
    ) -> CollectionHook<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        use_collection(&self.cache, target, on_change)
    }

    /// One-off read that bypasses the cache.
    pub async fn get_once(&self, query: &QueryDescriptor) -> Result<StoreData, StoreError> {
        self.store.get_once(query).await
    }

    /// An [`Assistant`] using the configured timeout.
    pub fn assistant(&self, generator: Arc<dyn TextGenerator>) -> Assistant {
        Assistant::new(generator, self.options.assist_timeout())
    }

    /// Cancel every live subscription and wait for in-flight writes.
    pub async fn shutdown(&self) {
        self.cache.close_all();
        self.writes.wait_idle().await;
    }
}
