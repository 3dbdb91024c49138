//! Qdrant REST adapter.
//!
//! Thin client over the points API; all ranking and consistency logic lives
//! in the callers. Any transport failure or non-success response surfaces as
//! `IndexUnavailable`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{IndexFilter, IndexPoint, PointPayload, ScoredPoint, VectorIndex};
use crate::core::config::VectorConfig;
use crate::core::errors::CoreError;

#[derive(Clone)]
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    client: Client,
}

impl QdrantIndex {
    pub fn new(config: VectorConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection,
            client: Client::new(),
        }
    }

    /// Create the collection (cosine distance) if it does not exist yet.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<(), CoreError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::IndexUnavailable(e.to_string()))?;
        if res.status().is_success() {
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        let res = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::IndexUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::IndexUnavailable(format!(
                "create collection: {}: {}",
                status, text
            )));
        }

        Ok(())
    }

    fn document_filter(document_ids: &[String]) -> Value {
        json!({
            "must": [{
                "key": "document_id",
                "match": { "any": document_ids }
            }]
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, CoreError> {
        let res = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::IndexUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::IndexUnavailable(format!("{}: {}", status, text)));
        }

        res.json()
            .await
            .map_err(|e| CoreError::IndexUnavailable(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<(), CoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>()
        });

        let res = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::IndexUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::IndexUnavailable(format!(
                "upsert: {}: {}",
                status, text
            )));
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ScoredPoint>, CoreError> {
        if filter.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
            "filter": Self::document_filter(&filter.document_ids),
        });

        let payload = self.post_json(&url, &body).await?;

        let mut results = Vec::new();
        if let Some(hits) = payload["result"].as_array() {
            for hit in hits {
                let id = match hit["id"].as_str() {
                    Some(id) => id.to_string(),
                    None => hit["id"].to_string(),
                };
                let score = hit["score"].as_f64().unwrap_or(0.0) as f32;
                let point_payload: PointPayload =
                    serde_json::from_value(hit["payload"].clone()).map_err(|e| {
                        CoreError::IndexUnavailable(format!("malformed payload: {}", e))
                    })?;
                results.push(ScoredPoint {
                    id,
                    score,
                    payload: point_payload,
                });
            }
        }

        Ok(results)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), CoreError> {
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        let body = json!({
            "filter": Self::document_filter(std::slice::from_ref(&document_id.to_string())),
        });

        self.post_json(&url, &body).await?;
        Ok(())
    }

    async fn count_for_document(&self, document_id: &str) -> Result<usize, CoreError> {
        let url = format!(
            "{}/collections/{}/points/count",
            self.base_url, self.collection
        );
        let body = json!({
            "filter": Self::document_filter(std::slice::from_ref(&document_id.to_string())),
            "exact": true,
        });

        let payload = self.post_json(&url, &body).await?;
        Ok(payload["result"]["count"].as_u64().unwrap_or(0) as usize)
    }
}
