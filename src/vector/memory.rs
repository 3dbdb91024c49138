//! In-process vector index.
//!
//! Brute-force cosine similarity over an id-keyed map. Used by tests and by
//! single-process deployments that do not want an external index.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{IndexFilter, IndexPoint, PointPayload, ScoredPoint, VectorIndex};
use crate::core::errors::CoreError;

#[derive(Default)]
pub struct MemoryIndex {
    points: RwLock<HashMap<String, (Vec<f32>, PointPayload)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<(), CoreError> {
        let mut guard = self.points.write().await;
        for point in points {
            guard.insert(point.id, (point.vector, point.payload));
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

        let guard = self.points.read().await;
        let mut scored: Vec<ScoredPoint> = guard
            .iter()
            .filter(|(_, (_, payload))| filter.document_ids.contains(&payload.document_id))
            .map(|(id, (stored, payload))| ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                payload: payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.ordinal.cmp(&b.payload.ordinal))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), CoreError> {
        let mut guard = self.points.write().await;
        guard.retain(|_, (_, payload)| payload.document_id != document_id);
        Ok(())
    }

    async fn count_for_document(&self, document_id: &str) -> Result<usize, CoreError> {
        let guard = self.points.read().await;
        Ok(guard
            .values()
            .filter(|(_, payload)| payload.document_id == document_id)
            .count())
    }
}
