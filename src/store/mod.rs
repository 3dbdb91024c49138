//! Record store — the authoritative home of document status and ordering
//! metadata. Embeddings live in the vector index; the two are reconciled by
//! the ingestion pipeline's write ordering.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::CoreError;
use crate::ingest::chunker::DocumentFormat;

/// Document lifecycle. `pending -> processing -> processed | failed`,
/// no transition out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    /// Original filename, used for source labels.
    pub filename: String,
    /// Where the uploaded bytes were stored.
    pub stored_path: String,
    pub size_bytes: i64,
    pub format: DocumentFormat,
    pub status: DocumentStatus,
    /// Set iff status = failed.
    pub error: Option<String>,
    /// Authoritative only when status = processed.
    pub chunk_count: i64,
    pub created_at: String,
}

/// Chunk metadata row. The embedding itself lives in the vector index under
/// the same id; only the document id links back to the owning document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    /// Source labels cited by an assistant message.
    pub sources: Vec<String>,
    pub created_at: String,
}

/// Narrow repository interface over the relational record store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, document: &Document) -> Result<(), CoreError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, CoreError>;

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, CoreError>;

    /// Ids of the owner's documents with status = processed.
    async fn list_processed_ids(&self, owner_id: &str) -> Result<Vec<String>, CoreError>;

    /// Atomic `pending -> processing` transition. Returns false when the
    /// document is missing or not pending; at most one caller wins, which
    /// makes this the per-document ingestion lock.
    async fn claim_for_processing(&self, id: &str) -> Result<bool, CoreError>;

    /// Terminal `processing -> processed` with the final chunk count.
    async fn mark_processed(&self, id: &str, chunk_count: i64) -> Result<(), CoreError>;

    /// Terminal `processing -> failed` with human-readable detail.
    async fn mark_failed(&self, id: &str, detail: &str) -> Result<(), CoreError>;

    /// Delete the document row; chunk rows cascade. Returns false when the
    /// document did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool, CoreError>;

    async fn insert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), CoreError>;

    /// Chunk rows for a document, ordered by ordinal.
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>, CoreError>;

    async fn delete_chunks(&self, document_id: &str) -> Result<usize, CoreError>;

    async fn create_session(
        &self,
        owner_id: &str,
        title: Option<&str>,
    ) -> Result<String, CoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, CoreError>;

    async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        sources: &[String],
    ) -> Result<(), CoreError>;

    /// Append a user question and its assistant reply as one atomic write;
    /// a failure leaves neither message behind.
    async fn append_exchange(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        sources: &[String],
    ) -> Result<(), CoreError>;

    /// Most recent messages trimmed to `limit`, returned oldest-first.
    /// A limit of 0 yields no messages.
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, CoreError>;
}
