//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_ASSIST_TIMEOUT_MS: u64 = 15_000;

/// Options for [`DataClient`](crate::client::DataClient). Every field is
/// optional; unset fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientOptions {
    /// Timeout for text-generation calls (default: 15000).
    pub assist_timeout_ms: Option<u64>,
    /// Also publish live-subscription failures to the error emitter
    /// (default: true). The binding's own error is set regardless.
    pub emit_read_errors: Option<bool>,
}

impl ClientOptions {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn assist_timeout(&self) -> Duration {
        Duration::from_millis(self.assist_timeout_ms.unwrap_or(DEFAULT_ASSIST_TIMEOUT_MS))
    }

    pub fn emit_read_errors(&self) -> bool {
        self.emit_read_errors.unwrap_or(true)
    }
}
