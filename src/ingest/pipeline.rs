//! Ingestion pipeline.
//!
//! Per-document state machine `pending -> processing -> processed | failed`.
//! `schedule` claims the pending document atomically and spawns one task for
//! the whole parse/chunk/embed/index run; the caller returns immediately and
//! observes progress by polling `status`. Before a terminal status is
//! written the pipeline reconciles the vector index with the record store,
//! so neither ever holds chunks the other does not know about.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::AppConfig;
use crate::core::errors::CoreError;
use crate::ingest::chunker::{self, ChunkConfig, ChunkSpan, DocumentFormat, SpanMeta};
use crate::llm::Embedder;
use crate::store::{ChunkRecord, Document, DocumentStatus, DocumentStore};
use crate::vector::{IndexPoint, PointPayload, VectorIndex};

#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkConfig,
    upload_dir: PathBuf,
    max_file_bytes: usize,
    embed_batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            chunking: config.chunking.clone(),
            upload_dir: config.storage.upload_dir(),
            max_file_bytes: config.ingest.max_file_bytes,
            embed_batch_size: config.embedding.batch_size.max(1),
            max_retries: config.ingest.max_retries,
            retry_backoff: Duration::from_millis(config.ingest.retry_backoff_ms),
        }
    }

    /// Validate and persist an upload, returning the pending document record.
    pub async fn register_upload(
        &self,
        owner_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Document, CoreError> {
        let format = DocumentFormat::from_filename(filename).ok_or_else(|| {
            CoreError::UnsupportedFormat(format!("{}: allowed types are txt, csv, pdf", filename))
        })?;

        if bytes.len() > self.max_file_bytes {
            return Err(CoreError::InvalidUpload(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_file_bytes
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let stored_path = self.upload_dir.join(format!("{}.{}", id, format.extension()));
        tokio::fs::write(&stored_path, bytes)
            .await
            .map_err(CoreError::storage)?;

        let document = Document {
            id,
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            stored_path: stored_path.to_string_lossy().into_owned(),
            size_bytes: bytes.len() as i64,
            format,
            status: DocumentStatus::Pending,
            error: None,
            chunk_count: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(err) = self.store.create_document(&document).await {
            // Don't leave the payload orphaned on disk.
            if let Err(e) = tokio::fs::remove_file(&stored_path).await {
                tracing::warn!("could not remove stored upload after insert failure: {}", e);
            }
            return Err(err);
        }

        tracing::info!(document_id = %document.id, filename, "upload registered");
        Ok(document)
    }

    /// Schedule ingestion for a pending document. Non-blocking: the claim is
    /// taken here, the run happens on its own task. A document that is
    /// already processing or terminal is rejected with `Conflict`, never run
    /// concurrently with itself.
    pub async fn schedule(&self, document_id: &str) -> Result<(), CoreError> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))?;

        if !self.store.claim_for_processing(document_id).await? {
            return Err(CoreError::Conflict(format!(
                "document {} is {}, not pending",
                document_id,
                document.status.as_str()
            )));
        }

        let pipeline = self.clone();
        let claimed = Document {
            status: DocumentStatus::Processing,
            ..document
        };
        tokio::spawn(async move {
            pipeline.run(claimed).await;
        });

        Ok(())
    }

    /// Current status record: status, chunk count, error detail. Pure read,
    /// never blocks on the pipeline.
    pub async fn status(&self, document_id: &str) -> Result<Document, CoreError> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))
    }

    pub async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, CoreError> {
        self.store.list_documents(owner_id).await
    }

    /// Delete a document, its chunk rows (cascade) and its vectors. Safe
    /// while the document is still processing: the run's checkpoint sees the
    /// missing record and rolls back its own writes.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), CoreError> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))?;

        self.store.delete_document(document_id).await?;
        self.index.delete_by_document(document_id).await?;

        if let Err(e) = tokio::fs::remove_file(&document.stored_path).await {
            tracing::warn!(document_id, "could not remove stored file: {}", e);
        }

        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    /// One full pipeline run. Errors never escape: they become the
    /// document's terminal `failed` detail.
    async fn run(&self, document: Document) {
        let document_id = document.id.clone();
        tracing::info!(document_id = %document_id, format = document.format.as_str(), "ingestion started");

        match self.process(&document).await {
            Ok(Some(chunk_count)) => {
                if let Err(e) = self.store.mark_processed(&document_id, chunk_count).await {
                    tracing::error!(document_id = %document_id, "failed to record processed status: {}", e);
                    return;
                }
                tracing::info!(document_id = %document_id, chunk_count, "ingestion complete");
            }
            Ok(None) => {
                tracing::info!(document_id = %document_id, "document deleted mid-run; rolled back");
            }
            Err(err) => {
                tracing::warn!(document_id = %document_id, "ingestion failed: {}", err);
                self.rollback(&document_id).await;
                if let Err(e) = self.store.mark_failed(&document_id, &err.to_string()).await {
                    tracing::error!(document_id = %document_id, "failed to record failed status: {}", e);
                }
            }
        }
    }

    /// Parse, chunk, embed and index one document. Returns the committed
    /// chunk count, or `None` when the document disappeared before the
    /// commit checkpoint.
    async fn process(&self, document: &Document) -> Result<Option<i64>, CoreError> {
        let bytes = tokio::fs::read(&document.stored_path)
            .await
            .map_err(|e| CoreError::Storage(format!("read stored upload: {}", e)))?;

        // Parsing is CPU-bound (pdf in particular); keep it off the runtime.
        let format = document.format;
        let chunk_config = self.chunking.clone();
        let spans = tokio::task::spawn_blocking(move || chunker::chunk(&bytes, format, &chunk_config))
            .await
            .map_err(|e| CoreError::Storage(format!("chunking task: {}", e)))??;

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(spans.len());
        for batch in spans.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            vectors.extend(self.embed_with_retry(&texts).await?);
        }

        // Cancellation checkpoint: the document may have been deleted while
        // we were chunking and embedding. Nothing durable is written before
        // this point.
        match self.store.get_document(&document.id).await? {
            Some(current) if current.status == DocumentStatus::Processing => {}
            _ => return Ok(None),
        }

        let (points, records) = build_chunks(document, &spans, vectors);
        let chunk_count = records.len() as i64;

        self.upsert_with_retry(points).await?;
        self.store.insert_chunks(&records).await?;

        Ok(Some(chunk_count))
    }

    /// Remove whatever this run already wrote, in both stores.
    async fn rollback(&self, document_id: &str) {
        if let Err(e) = self.index.delete_by_document(document_id).await {
            tracing::error!(document_id, "rollback: index delete failed: {}", e);
        }
        if let Err(e) = self.store.delete_chunks(document_id).await {
            tracing::error!(document_id, "rollback: chunk row delete failed: {}", e);
        }
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        let mut attempt = 0u32;
        loop {
            match self.embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "transient embedding failure, retrying: {}", e);
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upsert_with_retry(&self, points: Vec<IndexPoint>) -> Result<(), CoreError> {
        let mut attempt = 0u32;
        loop {
            match self.index.upsert(points.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "transient index failure, retrying: {}", e);
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Human-readable citation label for a chunk: filename plus page or row
/// range when the format provides one.
fn source_label(filename: &str, meta: &SpanMeta) -> String {
    match meta.label_suffix() {
        Some(suffix) => format!("{} ({})", filename, suffix),
        None => filename.to_string(),
    }
}

fn build_chunks(
    document: &Document,
    spans: &[ChunkSpan],
    vectors: Vec<Vec<f32>>,
) -> (Vec<IndexPoint>, Vec<ChunkRecord>) {
    let mut points = Vec::with_capacity(spans.len());
    let mut records = Vec::with_capacity(spans.len());

    for (ordinal, (span, vector)) in spans.iter().zip(vectors).enumerate() {
        let chunk_id = uuid::Uuid::new_v4().to_string();
        let metadata = if span.meta.is_empty() {
            None
        } else {
            serde_json::to_value(&span.meta).ok()
        };

        points.push(IndexPoint {
            id: chunk_id.clone(),
            vector,
            payload: PointPayload {
                document_id: document.id.clone(),
                ordinal: ordinal as i64,
                text: span.text.clone(),
                source_label: source_label(&document.filename, &span.meta),
            },
        });
        records.push(ChunkRecord {
            id: chunk_id,
            document_id: document.id.clone(),
            ordinal: ordinal as i64,
            text: span.text.clone(),
            metadata,
        });
    }

    (points, records)
}
