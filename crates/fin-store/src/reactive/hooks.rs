//! Binding hooks: typed, auto-detaching views over the subscription cache.
//!
//! A hook is owned by the calling context (a component, a task). While it
//! holds a ready target it stays attached to the cache; dropping it detaches.
//! An `Unavailable` target keeps the hook idle without touching the cache.
//!
//! [`retarget`](DocumentHook::retarget) is the re-render path: a freshly built
//! but equivalent query keeps the current binding, anything else attaches the
//! new binding before releasing the old one.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    error::{ErrorKind, StoreError},
    query::{
        normalize::NormalizedKey,
        types::{CollectionQuery, DocumentRef, QueryDescriptor, Target},
    },
    store::traits::StoreData,
    types::{Document, WithId},
};

use super::{
    binding::BindingView,
    cache::{BindingHandle, SubscriptionCache},
};

fn decode<T: DeserializeOwned>(doc: &Document) -> Result<WithId<T>, StoreError> {
    let data = serde_json::from_value(doc.data.clone()).map_err(|source| StoreError::Decode {
        path: doc.path.to_string(),
        source,
    })?;
    Ok(WithId {
        id: doc.id.clone(),
        data,
    })
}

// ============================================================================
// Shapes
// ============================================================================

/// How a hook turns raw store data into its output.
trait Shape: Send + Sync + 'static {
    type Query: Clone + Into<QueryDescriptor>;
    type Output: Clone + Send + Sync + 'static;

    fn project(data: &StoreData) -> Result<Option<Self::Output>, StoreError>;
}

struct DocShape<T>(PhantomData<fn() -> T>);

impl<T> Shape for DocShape<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Query = DocumentRef;
    type Output = WithId<T>;

    fn project(data: &StoreData) -> Result<Option<WithId<T>>, StoreError> {
        match data {
            StoreData::Document(Some(doc)) => decode(doc).map(Some),
            StoreData::Document(None) => Ok(None),
            StoreData::Documents(_) => Err(StoreError::InvalidQuery(
                "collection data delivered to a document binding".to_string(),
            )),
        }
    }
}

struct ListShape<T>(PhantomData<fn() -> T>);

impl<T> Shape for ListShape<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Query = CollectionQuery;
    type Output = Vec<WithId<T>>;

    fn project(data: &StoreData) -> Result<Option<Vec<WithId<T>>>, StoreError> {
        match data {
            StoreData::Documents(docs) => docs
                .iter()
                .map(decode)
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            StoreData::Document(_) => Err(StoreError::InvalidQuery(
                "document data delivered to a collection binding".to_string(),
            )),
        }
    }
}

fn project_view<S: Shape>(raw: &BindingView<StoreData>) -> BindingView<S::Output> {
    let mut view = BindingView {
        data: None,
        is_loading: raw.is_loading,
        error: raw.error,
    };
    if let Some(data) = &raw.data {
        match S::project(data) {
            Ok(out) => view.data = out,
            Err(e) => {
                tracing::warn!(error = %e, "binding data could not be decoded");
                view.error = view.error.or(Some(ErrorKind::Unknown));
            }
        }
    }
    view
}

// ============================================================================
// Hook core
// ============================================================================

type OutputFn<O> = dyn Fn(&BindingView<O>) + Send + Sync;

struct Hook<S: Shape> {
    cache: SubscriptionCache,
    handle: Option<BindingHandle>,
    on_change: Arc<OutputFn<S::Output>>,
}

impl<S: Shape> Hook<S> {
    fn new(
        cache: &SubscriptionCache,
        target: Target<S::Query>,
        on_change: Arc<OutputFn<S::Output>>,
    ) -> Self {
        let mut hook = Self {
            cache: cache.clone(),
            handle: None,
            on_change,
        };
        hook.retarget(target);
        hook
    }

    fn retarget(&mut self, target: Target<S::Query>) {
        let Target::Ready(query) = target else {
            self.handle = None;
            return;
        };
        let descriptor: QueryDescriptor = query.into();
        if self.handle.as_ref().map(BindingHandle::key) == Some(&descriptor.key()) {
            return;
        }
        let on_change = Arc::clone(&self.on_change);
        let next = self.cache.attach(&descriptor, move |raw| {
            on_change(&project_view::<S>(raw));
        });
        // Replacing the handle drops the previous attachment after the new
        // one exists, so a shared binding is never closed and reopened.
        self.handle = Some(next);
    }

    fn view(&self) -> BindingView<S::Output> {
        match &self.handle {
            None => BindingView::idle(),
            Some(handle) => handle
                .view()
                .map(|raw| project_view::<S>(&raw))
                .unwrap_or_else(BindingView::idle),
        }
    }

    fn key(&self) -> Option<&NormalizedKey> {
        self.handle.as_ref().map(BindingHandle::key)
    }
}

// ============================================================================
// Public hooks
// ============================================================================

/// Live view of one document, decoded as `T`.
pub struct DocumentHook<T = Value>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    inner: Hook<DocShape<T>>,
}

impl<T> DocumentHook<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Current view. A missing document is `data: None` with no error.
    pub fn view(&self) -> BindingView<WithId<T>> {
        self.inner.view()
    }

    pub fn retarget(&mut self, target: Target<DocumentRef>) {
        self.inner.retarget(target);
    }

    /// Key of the attached binding; `None` while idle.
    pub fn key(&self) -> Option<&NormalizedKey> {
        self.inner.key()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.handle.is_some()
    }
}

/// Live view of a collection query, decoded as `Vec<WithId<T>>`.
pub struct CollectionHook<T = Value>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    inner: Hook<ListShape<T>>,
}

impl<T> CollectionHook<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn view(&self) -> BindingView<Vec<WithId<T>>> {
        self.inner.view()
    }

    pub fn retarget(&mut self, target: Target<CollectionQuery>) {
        self.inner.retarget(target);
    }

    pub fn key(&self) -> Option<&NormalizedKey> {
        self.inner.key()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.handle.is_some()
    }
}

/// Bind to one document. `on_change` is called synchronously with the new
/// view after every update of the underlying binding.
pub fn use_document<T>(
    cache: &SubscriptionCache,
    target: Target<DocumentRef>,
    on_change: impl Fn(&BindingView<WithId<T>>) + Send + Sync + 'static,
) -> DocumentHook<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    DocumentHook {
        inner: Hook::new(cache, target, Arc::new(on_change)),
    }
}

/// Bind to a collection query. See [`use_document`].
pub fn use_collection<T>(
    cache: &SubscriptionCache,
    target: Target<CollectionQuery>,
    on_change: impl Fn(&BindingView<Vec<WithId<T>>>) + Send + Sync + 'static,
) -> CollectionHook<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    CollectionHook {
        inner: Hook::new(cache, target, Arc::new(on_change)),
    }
}
