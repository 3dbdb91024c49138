//! SQLite-backed record store.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{ChunkRecord, Document, DocumentStatus, DocumentStore, SessionInfo, StoredMessage};
use crate::core::errors::CoreError;
use crate::ingest::chunker::DocumentFormat;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(CoreError::storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                format TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id)")
            .execute(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sources TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)")
            .execute(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        Ok(())
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document, CoreError> {
        let format_str: String = row.get("format");
        let format = DocumentFormat::parse(&format_str)
            .ok_or_else(|| CoreError::Storage(format!("unknown format: {}", format_str)))?;

        let status_str: String = row.get("status");
        let status = DocumentStatus::parse(&status_str)
            .ok_or_else(|| CoreError::Storage(format!("unknown status: {}", status_str)))?;

        Ok(Document {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            filename: row.get("filename"),
            stored_path: row.get("stored_path"),
            size_bytes: row.get("size_bytes"),
            format,
            status,
            error: row.get("error"),
            chunk_count: row.get("chunk_count"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> ChunkRecord {
        let metadata_str: Option<String> = row.get("metadata");
        let metadata = metadata_str.and_then(|s| serde_json::from_str::<Value>(&s).ok());

        ChunkRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            ordinal: row.get("ordinal"),
            text: row.get("text"),
            metadata,
        }
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> StoredMessage {
        let sources_str: String = row.get("sources");
        let sources = serde_json::from_str::<Vec<String>>(&sources_str).unwrap_or_default();

        StoredMessage {
            id: row.get("id"),
            session_id: row.get("session_id"),
            role: row.get("role"),
            content: row.get("content"),
            sources,
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, document: &Document) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO documents
                (id, owner_id, filename, stored_path, size_bytes, format, status, error, chunk_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&document.id)
        .bind(&document.owner_id)
        .bind(&document.filename)
        .bind(&document.stored_path)
        .bind(document.size_bytes)
        .bind(document.format.as_str())
        .bind(document.status.as_str())
        .bind(&document.error)
        .bind(document.chunk_count)
        .bind(&document.created_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, CoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC, id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        rows.iter().map(Self::row_to_document).collect()
    }

    async fn list_processed_ids(&self, owner_id: &str) -> Result<Vec<String>, CoreError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT id FROM documents WHERE owner_id = ?1 AND status = 'processed' ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        Ok(rows)
    }

    async fn claim_for_processing(&self, id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing' WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_processed(&self, id: &str, chunk_count: i64) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE documents SET status = 'processed', chunk_count = ?2, error = NULL
             WHERE id = ?1 AND status = 'processing'",
        )
        .bind(id)
        .bind(chunk_count)
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        Ok(())
    }

    async fn mark_failed(&self, id: &str, detail: &str) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error = ?2, chunk_count = 0
             WHERE id = ?1 AND status = 'processing'",
        )
        .bind(id)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), CoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::storage)?;

        for chunk in chunks {
            let metadata_str = chunk
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default());

            sqlx::query(
                "INSERT INTO chunks (id, document_id, ordinal, text, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(&metadata_str)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::storage)?;
        }

        tx.commit().await.map_err(CoreError::storage)?;
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>, CoreError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY ordinal")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<usize, CoreError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        Ok(result.rows_affected() as usize)
    }

    async fn create_session(
        &self,
        owner_id: &str,
        title: Option<&str>,
    ) -> Result<String, CoreError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO sessions (id, owner_id, title, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&session_id)
            .bind(owner_id)
            .bind(title)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        Ok(session_id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, CoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::storage)?;

        Ok(Some(SessionInfo {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            message_count: count,
        }))
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        sources: &[String],
    ) -> Result<(), CoreError> {
        let sources_str = serde_json::to_string(sources).map_err(CoreError::storage)?;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO messages (session_id, role, content, sources, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(&sources_str)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        sources: &[String],
    ) -> Result<(), CoreError> {
        let sources_str = serde_json::to_string(sources).map_err(CoreError::storage)?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(CoreError::storage)?;

        sqlx::query(
            "INSERT INTO messages (session_id, role, content, sources, created_at)
             VALUES (?1, 'user', ?2, '[]', ?3)",
        )
        .bind(session_id)
        .bind(question)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::storage)?;

        sqlx::query(
            "INSERT INTO messages (session_id, role, content, sources, created_at)
             VALUES (?1, 'assistant', ?2, ?3, ?4)",
        )
        .bind(session_id)
        .bind(answer)
        .bind(&sources_str)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::storage)?;

        tx.commit().await.map_err(CoreError::storage)?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, CoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::storage)?;

        let mut messages: Vec<StoredMessage> = rows.iter().map(Self::row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        let tmp = std::env::temp_dir().join(format!(
            "docchat-store-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        SqliteStore::new(tmp).await.unwrap()
    }

    fn make_document(id: &str, owner: &str) -> Document {
        Document {
            id: id.to_string(),
            owner_id: owner.to_string(),
            filename: "notes.txt".to_string(),
            stored_path: "/tmp/notes.txt".to_string(),
            size_bytes: 42,
            format: DocumentFormat::Text,
            status: DocumentStatus::Pending,
            error: None,
            chunk_count: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn make_chunk(id: &str, document_id: &str, ordinal: i64) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: document_id.to_string(),
            ordinal,
            text: format!("chunk {}", ordinal),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn claim_is_single_winner() {
        let store = test_store().await;
        store.create_document(&make_document("d1", "u1")).await.unwrap();

        assert!(store.claim_for_processing("d1").await.unwrap());
        // Second claim loses: document is no longer pending.
        assert!(!store.claim_for_processing("d1").await.unwrap());
        // Unknown id loses too.
        assert!(!store.claim_for_processing("nope").await.unwrap());

        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
    }

    #[tokio::test]
    async fn terminal_transitions_record_detail() {
        let store = test_store().await;
        store.create_document(&make_document("d1", "u1")).await.unwrap();
        store.create_document(&make_document("d2", "u1")).await.unwrap();

        store.claim_for_processing("d1").await.unwrap();
        store.mark_processed("d1", 7).await.unwrap();
        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processed);
        assert_eq!(doc.chunk_count, 7);
        assert!(doc.error.is_none());

        store.claim_for_processing("d2").await.unwrap();
        store.mark_failed("d2", "pdf parse: broken xref").await.unwrap();
        let doc = store.get_document("d2").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.chunk_count, 0);
        assert_eq!(doc.error.as_deref(), Some("pdf parse: broken xref"));

        // mark_* guards require status = processing; a processed document
        // cannot be flipped to failed afterwards.
        store.mark_failed("d1", "late error").await.unwrap();
        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn chunks_are_ordinal_ordered_and_cascade() {
        let store = test_store().await;
        store.create_document(&make_document("d1", "u1")).await.unwrap();

        store
            .insert_chunks(&[
                make_chunk("c2", "d1", 2),
                make_chunk("c0", "d1", 0),
                make_chunk("c1", "d1", 1),
            ])
            .await
            .unwrap();

        let chunks = store.chunks_for_document("d1").await.unwrap();
        let ordinals: Vec<i64> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);

        assert!(store.delete_document("d1").await.unwrap());
        let chunks = store.chunks_for_document("d1").await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn processed_listing_filters_status() {
        let store = test_store().await;
        store.create_document(&make_document("d1", "u1")).await.unwrap();
        store.create_document(&make_document("d2", "u1")).await.unwrap();
        store.create_document(&make_document("d3", "other")).await.unwrap();

        store.claim_for_processing("d1").await.unwrap();
        store.mark_processed("d1", 1).await.unwrap();
        store.claim_for_processing("d3").await.unwrap();
        store.mark_processed("d3", 1).await.unwrap();

        let ids = store.list_processed_ids("u1").await.unwrap();
        assert_eq!(ids, vec!["d1".to_string()]);
    }

    #[tokio::test]
    async fn session_messages_round_trip() {
        let store = test_store().await;
        let session_id = store.create_session("u1", Some("Quarterly report")).await.unwrap();

        store
            .append_message(&session_id, "user", "What was Q3 revenue?", &[])
            .await
            .unwrap();
        store
            .append_message(
                &session_id,
                "assistant",
                "Q3 revenue was 40M.",
                &["report.pdf (page 3)".to_string()],
            )
            .await
            .unwrap();

        let messages = store.recent_messages(&session_id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].sources, vec!["report.pdf (page 3)".to_string()]);

        let info = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(info.message_count, 2);
        assert_eq!(info.title.as_deref(), Some("Quarterly report"));

        // limit keeps the most recent, returned oldest-first
        let latest = store.recent_messages(&session_id, 1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].role, "assistant");

        // limit 0 means zero messages, not one
        let none = store.recent_messages(&session_id, 0).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn exchange_is_appended_atomically() {
        let store = test_store().await;
        let session_id = store.create_session("u1", None).await.unwrap();

        store
            .append_exchange(
                &session_id,
                "What was Q3 revenue?",
                "Q3 revenue was 40M.",
                &["report.pdf (page 3)".to_string()],
            )
            .await
            .unwrap();

        let messages = store.recent_messages(&session_id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert!(messages[0].sources.is_empty());
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].sources, vec!["report.pdf (page 3)".to_string()]);

        // A failed append (unknown session violates the FK) rolls the whole
        // pair back; no half-written exchange survives.
        let err = store
            .append_exchange("ghost", "question", "answer", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
        assert!(store.recent_messages("ghost", 10).await.unwrap().is_empty());
    }
}
