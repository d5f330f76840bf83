//! ErrorEvent: a structured failure published to the app-wide error channel.
//!
//! Emitted by the write dispatcher for every failed background write, and by
//! the subscription cache when a live subscription is rejected.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{ErrorKind, StoreError},
    types::Operation,
};

/// What was being attempted when a failure happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub operation: Operation,
    /// Document or collection path.
    pub target: String,
    /// The payload of the rejected write. Only recorded for permission
    /// failures, where it is needed to diagnose the access rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// A failure record delivered to [`ErrorEmitter`](super::ErrorEmitter)
/// listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub context: ErrorContext,
    /// Display form of the underlying error.
    pub cause: String,
}

impl ErrorEvent {
    pub fn from_store_error(
        error: &StoreError,
        operation: Operation,
        target: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        let kind = error.kind();
        Self {
            kind,
            context: ErrorContext {
                operation,
                target: target.into(),
                request_data: if kind == ErrorKind::PermissionDenied {
                    payload
                } else {
                    None
                },
            },
            cause: error.to_string(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == ErrorKind::PermissionDenied
    }

    /// JSON rendering for a diagnostic overlay.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} during {} of {}: {}",
            self.kind, self.context.operation, self.context.target, self.cause
        )
    }
}
