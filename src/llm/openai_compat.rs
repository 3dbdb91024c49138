//! OpenAI-compatible HTTP client for embeddings and chat completions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChatMessage, Embedder, Generator};
use crate::core::config::{EmbeddingConfig, GenerationConfig};
use crate::core::errors::CoreError;

#[derive(Clone)]
pub struct OpenAiCompatClient {
    embedding: EmbeddingConfig,
    generation: GenerationConfig,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(embedding: EmbeddingConfig, generation: GenerationConfig) -> Self {
        Self {
            embedding: EmbeddingConfig {
                base_url: embedding.base_url.trim_end_matches('/').to_string(),
                ..embedding
            },
            generation: GenerationConfig {
                base_url: generation.base_url.trim_end_matches('/').to_string(),
                ..generation
            },
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiCompatClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.embedding.base_url);
        let body = json!({
            "model": self.embedding.model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::EmbeddingUnavailable(format!(
                "{}: {}",
                status, text
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(CoreError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    fn model_id(&self) -> &str {
        &self.embedding.model
    }
}

#[async_trait]
impl Generator for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        timeout: Duration,
    ) -> Result<String, CoreError> {
        let url = format!("{}/v1/chat/completions", self.generation.base_url);

        let body = json!({
            "model": self.generation.model,
            "messages": messages,
            "stream": false,
            "temperature": self.generation.temperature,
            "max_tokens": self.generation.max_tokens,
        });

        let res = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::GenerationUnavailable(format!(
                        "timed out after {}s",
                        timeout.as_secs()
                    ))
                } else {
                    CoreError::GenerationUnavailable(e.to_string())
                }
            })?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::GenerationUnavailable(format!(
                "{}: {}",
                status, text
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| CoreError::GenerationUnavailable(e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }
}
