//! Retrieval engine: embeds a question, runs a scoped similarity search and
//! returns ranked chunks with their source labels.

use std::sync::Arc;

use crate::core::config::RetrievalConfig;
use crate::core::errors::CoreError;
use crate::llm::Embedder;
use crate::store::{DocumentStatus, DocumentStore};
use crate::vector::{IndexFilter, VectorIndex};

/// What a query may see: every processed document of one owner, or exactly
/// one named document.
#[derive(Debug, Clone)]
pub enum RetrievalScope {
    OwnedCorpus { owner_id: String },
    Document { document_id: String },
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub score: f32,
    pub source_label: String,
}

pub struct RetrievalEngine {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            config,
        }
    }

    /// Top-k chunks for `query` within `scope`.
    ///
    /// A scope with no processed documents yields an empty result, never an
    /// error; under-filled scopes return whatever exists. Ordering is
    /// descending score with ties broken by ascending chunk ordinal.
    pub async fn retrieve(
        &self,
        query: &str,
        scope: &RetrievalScope,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, CoreError> {
        let document_ids = self.resolve_scope(scope).await?;
        if document_ids.is_empty() {
            tracing::debug!("retrieval scope resolved to zero processed documents");
            return Ok(Vec::new());
        }

        // max_top_k = 0 in a hand-edited config must not invert the clamp
        // bounds; treat it as 1.
        let k = k.clamp(1, self.config.max_top_k.max(1));

        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = embeddings.into_iter().next().ok_or_else(|| {
            CoreError::EmbeddingUnavailable("no embedding returned for query".to_string())
        })?;

        let mut hits = self
            .index
            .query(&query_vector, k, &IndexFilter::documents(document_ids))
            .await?;

        // Deterministic order regardless of the index backend.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payload.ordinal.cmp(&b.payload.ordinal))
        });

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.id,
                document_id: hit.payload.document_id,
                ordinal: hit.payload.ordinal,
                text: hit.payload.text,
                score: hit.score,
                source_label: hit.payload.source_label,
            })
            .collect())
    }

    /// Resolve a scope to processed document ids. Unknown or unprocessed
    /// documents resolve to nothing rather than erroring.
    async fn resolve_scope(&self, scope: &RetrievalScope) -> Result<Vec<String>, CoreError> {
        match scope {
            RetrievalScope::OwnedCorpus { owner_id } => {
                self.store.list_processed_ids(owner_id).await
            }
            RetrievalScope::Document { document_id } => {
                match self.store.get_document(document_id).await? {
                    Some(doc) if doc.status == DocumentStatus::Processed => {
                        Ok(vec![doc.id])
                    }
                    _ => Ok(Vec::new()),
                }
            }
        }
    }
}
