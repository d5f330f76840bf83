//! Query descriptor types: single-document references, filtered and ordered
//! collection queries, and the `Target` wrapper for queries whose
//! prerequisites may not be available yet.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CollectionPath, DocPath};

use super::normalize::{normalize, NormalizedKey};

// ============================================================================
// Filters
// ============================================================================

/// Comparison operator of a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Field value is one of the operand array's elements.
    In,
    /// Field is an array containing the operand.
    ArrayContains,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
            Self::ArrayContains => "array-contains",
        }
    }
}

/// A single `field <op> value` clause. `field` may be a dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// Sort direction for an ordering clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// An ordering clause for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

// ============================================================================
// Descriptors
// ============================================================================

/// Reference to one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    path: DocPath,
}

impl DocumentRef {
    pub fn new(path: DocPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }
}

/// All documents of a collection matching every filter, ordered by the
/// ordering clauses in sequence, optionally truncated to `limit`.
///
/// Built by value: each builder call returns a new query.
#[derive(Debug, Clone)]
pub struct CollectionQuery {
    collection: CollectionPath,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
}

impl CollectionQuery {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Shorthand for `filter(Filter::new(field, op, value))`.
    pub fn where_field(
        self,
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filter(Filter::new(field, op, value))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }
}

/// What a binding watches: one document or a collection query.
///
/// Equality is query equivalence: two descriptors are equal when their
/// normalized keys are equal, so filter clause order is ignored.
#[derive(Debug, Clone)]
pub enum QueryDescriptor {
    Document(DocumentRef),
    Collection(CollectionQuery),
}

impl QueryDescriptor {
    pub fn key(&self) -> NormalizedKey {
        normalize(self)
    }

    /// The document or collection path this descriptor targets.
    pub fn target_path(&self) -> &str {
        match self {
            Self::Document(d) => d.path().as_str(),
            Self::Collection(q) => q.collection().as_str(),
        }
    }
}

impl PartialEq for QueryDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueryDescriptor {}

impl From<DocumentRef> for QueryDescriptor {
    fn from(value: DocumentRef) -> Self {
        Self::Document(value)
    }
}

impl From<CollectionQuery> for QueryDescriptor {
    fn from(value: CollectionQuery) -> Self {
        Self::Collection(value)
    }
}

// ============================================================================
// Target
// ============================================================================

/// A query that may not be constructible yet.
///
/// `Unavailable` is used while a prerequisite (typically the signed-in user
/// id) is missing. Hooks given `Unavailable` stay idle and never touch the
/// subscription cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Target<Q> {
    Unavailable,
    Ready(Q),
}

impl<Q> Target<Q> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn as_ready(&self) -> Option<&Q> {
        match self {
            Self::Ready(q) => Some(q),
            Self::Unavailable => None,
        }
    }

    pub fn map<R>(self, f: impl FnOnce(Q) -> R) -> Target<R> {
        match self {
            Self::Ready(q) => Target::Ready(f(q)),
            Self::Unavailable => Target::Unavailable,
        }
    }
}

impl<Q> From<Option<Q>> for Target<Q> {
    fn from(value: Option<Q>) -> Self {
        match value {
            Some(q) => Self::Ready(q),
            None => Self::Unavailable,
        }
    }
}
