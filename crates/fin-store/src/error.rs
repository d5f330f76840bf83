use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Operation;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse failure classification shared by bindings and error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing or insufficient permissions: {operation} on {path}")]
    PermissionDenied { operation: Operation, path: String },

    #[error("Document not found: {path}")]
    NotFound { path: String },

    #[error("Document already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Invalid path \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid payload for {path}: {reason}")]
    InvalidPayload { path: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to decode document {path}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn permission_denied(operation: Operation, path: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// AssistError
// ---------------------------------------------------------------------------

/// Failure of the external text-generation collaborator.
///
/// Callers only ever need to know that generation failed; the variants exist
/// for logging.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error("Text generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Text generation returned malformed output: {0}")]
    Malformed(String),

    #[error("Failed to encode text generation input: {0}")]
    Encode(String),

    #[error("Text generation service failed: {0}")]
    Service(String),
}

impl AssistError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Unknown
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse client options: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// FinStoreError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FinStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Assist(#[from] AssistError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No tokio runtime available for background writes: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Convenience alias; the default error type is `FinStoreError`.
pub type Result<T, E = FinStoreError> = std::result::Result<T, E>;
