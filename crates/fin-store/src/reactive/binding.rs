//! Live binding state as seen by consumers.

use crate::error::ErrorKind;

/// Lifecycle of a live binding.
///
/// `Uninitialized -> Loading -> {Ready, Error}`. `Error -> Ready` happens when
/// the store delivers data again after a transient failure. A detached
/// binding is removed from the cache and is never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Uninitialized,
    Loading,
    Ready,
    Error,
}

/// Consumer-facing view of one binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingView<T> {
    /// Last known data. Kept through errors.
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<ErrorKind>,
}

impl<T> BindingView<T> {
    /// The inert view of a hook without a target.
    pub fn idle() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
        }
    }

    pub fn loading() -> Self {
        Self {
            data: None,
            is_loading: true,
            error: None,
        }
    }

    pub(crate) fn from_state(state: BindingState, data: Option<T>, error: Option<ErrorKind>) -> Self {
        Self {
            data,
            is_loading: matches!(state, BindingState::Uninitialized | BindingState::Loading),
            error,
        }
    }

    pub fn map<R>(self, f: impl FnOnce(T) -> R) -> BindingView<R> {
        BindingView {
            data: self.data.map(f),
            is_loading: self.is_loading,
            error: self.error,
        }
    }
}

impl<T> Default for BindingView<T> {
    fn default() -> Self {
        Self::idle()
    }
}
