//! Vector index seam.
//!
//! The index is the authoritative store of embeddings; everything else about
//! a chunk (status, ordering) is owned by the record store. Implementations:
//! `QdrantIndex` over the REST API, and the in-process `MemoryIndex`.

mod memory;
mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// Payload stored alongside each vector, enough to answer a query without a
/// record-store round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub source_label: String,
}

#[derive(Debug, Clone)]
pub struct IndexPoint {
    /// Same id as the chunk record.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// Document scope applied inside the index query. An empty filter matches
/// nothing: scoping is never widened by omission.
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub document_ids: Vec<String>,
}

impl IndexFilter {
    pub fn documents(ids: Vec<String>) -> Self {
        Self { document_ids: ids }
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace points by id.
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<(), CoreError>;

    /// Top-k nearest points within the filter, by descending cosine
    /// similarity.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ScoredPoint>, CoreError>;

    /// Remove every vector belonging to a document.
    async fn delete_by_document(&self, document_id: &str) -> Result<(), CoreError>;

    async fn count_for_document(&self, document_id: &str) -> Result<usize, CoreError>;
}
