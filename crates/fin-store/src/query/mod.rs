//! Query descriptors, their normalized identity, and collection evaluation.

pub mod execute;
pub mod normalize;
pub mod paths;
pub mod types;

pub use normalize::{normalize, NormalizedKey};
pub use paths::{UserCollection, UserScope};
pub use types::{
    CollectionQuery, DocumentRef, Filter, FilterOp, OrderBy, QueryDescriptor, SortDirection,
    Target,
};
