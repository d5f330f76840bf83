//! The remote document store capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::StoreError,
    query::types::QueryDescriptor,
    types::{DocPath, Document, SetOptions, Unsubscribe},
};

/// A result pushed by the store: one (possibly missing) document, or the
/// current matches of a collection query.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreData {
    Document(Option<Document>),
    Documents(Vec<Document>),
}

impl StoreData {
    /// Number of documents carried.
    pub fn len(&self) -> usize {
        match self {
            Self::Document(doc) => usize::from(doc.is_some()),
            Self::Documents(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callback receiving every snapshot of a subscription, in delivery order.
pub type DataCallback = Arc<dyn Fn(StoreData) + Send + Sync>;

/// Callback receiving a subscription failure. A failed subscription delivers
/// nothing further.
pub type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// The capabilities the data layer needs from a hosted document database.
///
/// `subscribe` is synchronous to register; the store may invoke `on_data`
/// either during the call or later from any thread. Writes and one-off reads
/// are asynchronous.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a live subscription. The returned closure cancels it.
    fn subscribe(
        &self,
        query: &QueryDescriptor,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Unsubscribe;

    /// Read the current result once.
    async fn get_once(&self, query: &QueryDescriptor) -> Result<StoreData, StoreError>;

    /// Create a new document. Fails if one already exists at `doc`.
    async fn create(&self, doc: &DocPath, payload: Value) -> Result<(), StoreError>;

    /// Overwrite, or with `merge` shallow-merge into, the document at `doc`.
    async fn set(&self, doc: &DocPath, payload: Value, opts: SetOptions)
        -> Result<(), StoreError>;

    /// Shallow-merge `patch` into an existing document. Fails with
    /// `NotFound` when the document does not exist.
    async fn update(&self, doc: &DocPath, patch: Value) -> Result<(), StoreError>;

    async fn delete(&self, doc: &DocPath) -> Result<(), StoreError>;
}
