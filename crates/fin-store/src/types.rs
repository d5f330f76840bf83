//! Shared value types: document paths, documents, operations and write options.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

// ============================================================================
// Unsubscribe handle
// ============================================================================

/// An owned one-shot closure that removes a subscription or listener when
/// called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

// ============================================================================
// Paths
// ============================================================================

fn split_segments(raw: &str) -> Result<Vec<&str>, StoreError> {
    if raw.is_empty() {
        return Err(StoreError::InvalidPath {
            path: raw.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    let segments: Vec<&str> = raw.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: raw.to_string(),
            reason: "path contains an empty segment".to_string(),
        });
    }
    Ok(segments)
}

/// Validate a single path segment (a document id or collection name).
pub(crate) fn check_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidPath {
            path: segment.to_string(),
            reason: "segment must be non-empty and must not contain '/'".to_string(),
        });
    }
    Ok(())
}

/// Path to a single document, e.g. `users/u1/transactions/t9`.
///
/// Always has an even number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(raw: impl Into<String>) -> Result<Self, StoreError> {
        let raw = raw.into();
        let segments = split_segments(&raw)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath {
                path: raw,
                reason: "document paths need an even number of segments".to_string(),
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last segment of the path.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The collection that contains this document.
    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// A sub-collection nested under this document.
    pub fn collection(&self, name: &str) -> Result<CollectionPath, StoreError> {
        check_segment(name)?;
        Ok(self.sub_collection(name))
    }

    /// `name` must be a known-valid segment.
    pub(crate) fn sub_collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{name}", self.0))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path to a collection, e.g. `users/u1/budgets`.
///
/// Always has an odd number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(raw: impl Into<String>) -> Result<Self, StoreError> {
        let raw = raw.into();
        let segments = split_segments(&raw)?;
        if segments.len() % 2 != 1 {
            return Err(StoreError::InvalidPath {
                path: raw,
                reason: "collection paths need an odd number of segments".to_string(),
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The document `id` inside this collection.
    pub fn doc(&self, id: &str) -> Result<DocPath, StoreError> {
        check_segment(id)?;
        Ok(self.child(id))
    }

    /// `id` must be a known-valid segment.
    pub(crate) fn child(&self, id: &str) -> DocPath {
        DocPath(format!("{}/{id}", self.0))
    }

    /// Whether `doc` is a direct child of this collection.
    pub fn contains(&self, doc: &DocPath) -> bool {
        doc.parent() == *self
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Documents
// ============================================================================

/// A document as delivered by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub path: DocPath,
    pub data: Value,
}

impl Document {
    pub fn new(path: DocPath, data: Value) -> Self {
        Self {
            id: path.id().to_string(),
            path,
            data,
        }
    }
}

/// Decoded document body paired with the document id.
#[derive(Debug, Clone, PartialEq)]
pub struct WithId<T> {
    pub id: String,
    pub data: T,
}

// ============================================================================
// Operations
// ============================================================================

/// The kind of store operation an error or write refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
    /// A `set` (overwrite or merge).
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Write => "write",
        };
        f.write_str(s)
    }
}

/// Options for a `set` write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge top-level fields into the existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}
