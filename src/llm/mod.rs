//! External model services: the embedder and the generation model.
//!
//! Both are reached over HTTP through `OpenAiCompatClient`; the traits keep
//! the pipeline and orchestrator testable with deterministic stubs.

mod openai_compat;

pub use openai_compat::OpenAiCompatClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Text-to-vector service. Ingestion and query paths must share one
/// instance: chunk and query embeddings are only comparable when produced by
/// the same model configuration.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;

    fn model_id(&self) -> &str;
}

/// Generation model service: one bounded, blocking completion per call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        timeout: Duration,
    ) -> Result<String, CoreError>;
}
