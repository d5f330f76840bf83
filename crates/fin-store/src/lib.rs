pub mod error;
pub mod types;

pub mod assist;
pub mod auth;
pub mod client;
pub mod config;
pub mod query;
pub mod reactive;
pub mod store;
pub mod writes;

pub use client::DataClient;
pub use config::ClientOptions;
pub use error::{ErrorKind, FinStoreError, Result, StoreError};
