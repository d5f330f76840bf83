//! Text-generation collaborator.
//!
//! The generator is opaque: structured JSON in, structured JSON out. The
//! [`Assistant`] wrapper checks both ends against Rust types with serde and
//! bounds each call with a timeout. Every failure collapses into an
//! [`AssistError`]; [`Assistant::invoke_or`] degrades to a fallback instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::AssistError;

/// User-implemented bridge to a hosted text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, input: Value) -> Result<Value, AssistError>;
}

#[derive(Clone)]
pub struct Assistant {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl Assistant {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Encode `input`, call the generator, and decode its output as `O`.
    pub async fn invoke<I, O>(&self, input: &I) -> Result<O, AssistError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input).map_err(|e| AssistError::Encode(e.to_string()))?;
        let output = tokio::time::timeout(self.timeout, self.generator.generate(input))
            .await
            .map_err(|_| AssistError::Timeout(self.timeout))??;
        serde_json::from_value(output).map_err(|e| AssistError::Malformed(e.to_string()))
    }

    /// [`invoke`](Self::invoke), returning `fallback` on any failure.
    pub async fn invoke_or<I, O>(&self, input: &I, fallback: O) -> O
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        match self.invoke(input).await {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(error = %e, "text generation failed; using fallback");
                fallback
            }
        }
    }
}
