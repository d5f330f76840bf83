//! Reactive layer: shared live bindings over a [`DocumentStore`].
//!
//! # Overview
//!
//! [`SubscriptionCache`] owns every store subscription, keyed by the
//! normalized query identity, and reference-counts its consumers. The hooks
//! in [`hooks`] are the consumer-facing surface. Failures that have no caller
//! left to receive them go to the [`ErrorEmitter`].
//!
//! # Modules
//!
//! - [`event`]: [`ErrorEvent`] and its context.
//! - [`emitter`]: typed pub/sub ([`EventEmitter<T>`], [`ErrorEmitter`]).
//! - [`binding`]: [`BindingState`], [`BindingView`].
//! - [`cache`]: [`SubscriptionCache`] and [`BindingHandle`].
//! - [`hooks`]: [`use_document`], [`use_collection`].
//!
//! [`DocumentStore`]: crate::store::DocumentStore

pub mod binding;
pub mod cache;
pub mod emitter;
pub mod event;
pub mod hooks;

pub use binding::{BindingState, BindingView};
pub use cache::{BindingHandle, ChangeFn, SubscriptionCache};
pub use emitter::{ErrorEmitter, EventEmitter, ListenerId};
pub use event::{ErrorContext, ErrorEvent};
pub use hooks::{use_collection, use_document, CollectionHook, DocumentHook};
