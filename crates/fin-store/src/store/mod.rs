//! Document store capability and the in-process implementation.

pub mod memory;
pub mod traits;

pub use memory::{AccessRule, MemoryStore, StoreStats};
pub use traits::{DataCallback, DocumentStore, ErrorCallback, StoreData};
