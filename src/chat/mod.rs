//! Chat orchestrator.
//!
//! Ties retrieval, prompt assembly and the generation model together into one
//! `answer` call. Session history is optional; when a session id is given the
//! exchange is recorded after a successful (or canned) answer, and replayed
//! into later prompts.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::AppConfig;
use crate::core::errors::CoreError;
use crate::llm::Generator;
use crate::retrieval::{RetrievalEngine, RetrievalScope};
use crate::store::{DocumentStore, SessionInfo, StoredMessage};

/// Returned when retrieval finds nothing in scope. The generation model is
/// never consulted for this reply.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find anything relevant in your documents to answer that. \
Try uploading a document that covers this topic, or rephrasing the question.";

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Source labels of the chunks the answer was grounded on.
    pub sources: Vec<String>,
}

pub struct ChatOrchestrator {
    store: Arc<dyn DocumentStore>,
    retrieval: Arc<RetrievalEngine>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    max_context_chars: usize,
    history_limit: usize,
    generation_timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        retrieval: Arc<RetrievalEngine>,
        generator: Arc<dyn Generator>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            retrieval,
            generator,
            top_k: config.retrieval.max_top_k,
            max_context_chars: config.chat.max_context_chars,
            history_limit: config.chat.history_limit,
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }

    /// Answer a question from the documents in `scope`.
    ///
    /// When retrieval comes back empty the canned reply is returned without
    /// invoking the generator. A generation failure propagates to the caller
    /// and leaves session history exactly as it was.
    pub async fn answer(
        &self,
        question: &str,
        scope: &RetrievalScope,
        session_id: Option<&str>,
    ) -> Result<Answer, CoreError> {
        let chunks = self.retrieval.retrieve(question, scope, self.top_k).await?;

        if chunks.is_empty() {
            tracing::info!("no relevant content in scope; returning canned answer");
            let answer = Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
            };
            self.record_exchange(session_id, question, &answer).await?;
            return Ok(answer);
        }

        let history = match session_id {
            Some(session) => {
                self.store
                    .recent_messages(session, self.history_limit)
                    .await?
            }
            None => Vec::new(),
        };

        let assembled = prompt::assemble(question, &chunks, &history, self.max_context_chars);
        tracing::debug!(
            chunks = chunks.len(),
            cited = assembled.sources.len(),
            "prompt assembled"
        );

        let text = self
            .generator
            .complete(assembled.messages, self.generation_timeout)
            .await?;

        let answer = Answer {
            text,
            sources: assembled.sources,
        };
        self.record_exchange(session_id, question, &answer).await?;
        Ok(answer)
    }

    pub async fn start_session(
        &self,
        owner_id: &str,
        title: Option<&str>,
    ) -> Result<String, CoreError> {
        self.store.create_session(owner_id, title).await
    }

    /// Recent messages for a session, oldest first.
    pub async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, CoreError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        self.store.recent_messages(&session.id, limit).await
    }

    pub async fn session_info(&self, session_id: &str) -> Result<SessionInfo, CoreError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))
    }

    async fn record_exchange(
        &self,
        session_id: Option<&str>,
        question: &str,
        answer: &Answer,
    ) -> Result<(), CoreError> {
        let Some(session) = session_id else {
            return Ok(());
        };
        self.store
            .append_exchange(session, question, &answer.text, &answer.sources)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::llm::{ChatMessage, Embedder};
    use crate::store::{ChunkRecord, Document, DocumentStatus, SqliteStore};
    use crate::vector::{IndexPoint, MemoryIndex, PointPayload, VectorIndex};

    struct KeywordEmbedder;

    const KEYWORDS: [&str; 3] = ["revenue", "headcount", "roadmap"];

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(inputs
                .iter()
                .map(|text| {
                    KEYWORDS
                        .iter()
                        .map(|kw| text.to_lowercase().matches(kw).count() as f32)
                        .collect()
                })
                .collect())
        }

        fn model_id(&self) -> &str {
            "keyword-stub"
        }
    }

    /// Counts invocations and remembers the last message list it saw.
    struct RecordingGenerator {
        calls: AtomicUsize,
        last_messages: Mutex<Vec<ChatMessage>>,
        reply: String,
    }

    impl RecordingGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _timeout: Duration,
        ) -> Result<String, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock().unwrap() = messages;
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _timeout: Duration,
        ) -> Result<String, CoreError> {
            Err(CoreError::GenerationUnavailable("stub outage".to_string()))
        }
    }

    struct Fixture {
        orchestrator: ChatOrchestrator,
        generator: Arc<RecordingGenerator>,
        _dir: tempfile::TempDir,
    }

    async fn fixture_with(generator: Arc<dyn Generator>) -> (ChatOrchestrator, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::new(dir.path().join("chat.db")).await.unwrap(),
        );
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(KeywordEmbedder);

        seed_document(&store, &index, &embedder).await;

        let config = AppConfig::default();
        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            index,
            embedder,
            config.retrieval.clone(),
        ));
        let orchestrator =
            ChatOrchestrator::new(store.clone(), retrieval, generator, &config);
        (orchestrator, store, dir)
    }

    async fn fixture() -> Fixture {
        let generator = Arc::new(RecordingGenerator::replying("grounded answer"));
        let (orchestrator, _store, dir) = fixture_with(generator.clone()).await;
        Fixture {
            orchestrator,
            generator,
            _dir: dir,
        }
    }

    /// One processed document with a revenue chunk and a roadmap chunk.
    async fn seed_document(
        store: &Arc<SqliteStore>,
        index: &Arc<MemoryIndex>,
        embedder: &Arc<KeywordEmbedder>,
    ) {
        let doc = Document {
            id: "doc-1".to_string(),
            owner_id: "u1".to_string(),
            filename: "report.txt".to_string(),
            stored_path: "/tmp/none".to_string(),
            size_bytes: 1,
            format: crate::ingest::chunker::DocumentFormat::Text,
            status: DocumentStatus::Pending,
            error: None,
            chunk_count: 0,
            created_at: String::new(),
        };
        store.create_document(&doc).await.unwrap();
        store.claim_for_processing("doc-1").await.unwrap();

        let texts = ["revenue grew by ten percent", "the roadmap slips a quarter"];
        let vectors = embedder
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();

        let mut points = Vec::new();
        let mut records = Vec::new();
        for (ordinal, (text, vector)) in texts.iter().zip(vectors).enumerate() {
            let id = format!("chunk-{}", ordinal);
            points.push(IndexPoint {
                id: id.clone(),
                vector,
                payload: PointPayload {
                    document_id: "doc-1".to_string(),
                    ordinal: ordinal as i64,
                    text: text.to_string(),
                    source_label: "report.txt".to_string(),
                },
            });
            records.push(ChunkRecord {
                id,
                document_id: "doc-1".to_string(),
                ordinal: ordinal as i64,
                text: text.to_string(),
                metadata: None,
            });
        }
        index.upsert(points).await.unwrap();
        store.insert_chunks(&records).await.unwrap();
        store.mark_processed("doc-1", 2).await.unwrap();
    }

    fn corpus() -> RetrievalScope {
        RetrievalScope::OwnedCorpus {
            owner_id: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn grounded_answer_carries_sources() {
        let fx = fixture().await;
        let answer = fx
            .orchestrator
            .answer("what happened to revenue?", &corpus(), None)
            .await
            .unwrap();

        assert_eq!(answer.text, "grounded answer");
        assert_eq!(answer.sources, vec!["report.txt"]);
        assert_eq!(fx.generator.calls.load(Ordering::SeqCst), 1);

        let system = &fx.generator.last_messages.lock().unwrap()[0];
        assert!(system.content.contains("[report.txt]"));
        assert!(system.content.contains("revenue grew by ten percent"));
    }

    #[tokio::test]
    async fn empty_scope_returns_canned_answer_without_generating() {
        let fx = fixture().await;
        let scope = RetrievalScope::OwnedCorpus {
            owner_id: "someone-else".to_string(),
        };
        let answer = fx
            .orchestrator
            .answer("anything at all?", &scope, None)
            .await
            .unwrap();

        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(fx.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn canned_exchange_is_still_recorded() {
        let fx = fixture().await;
        let session = fx.orchestrator.start_session("u2", None).await.unwrap();
        let scope = RetrievalScope::OwnedCorpus {
            owner_id: "u2".to_string(),
        };

        fx.orchestrator
            .answer("is there anything?", &scope, Some(&session))
            .await
            .unwrap();

        let history = fx.orchestrator.history(&session, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, NO_CONTEXT_ANSWER);
        assert!(history[1].sources.is_empty());
    }

    #[tokio::test]
    async fn session_exchange_is_recorded_with_sources() {
        let fx = fixture().await;
        let session = fx.orchestrator.start_session("u1", Some("report chat")).await.unwrap();

        fx.orchestrator
            .answer("how did revenue do?", &corpus(), Some(&session))
            .await
            .unwrap();

        let history = fx.orchestrator.history(&session, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "how did revenue do?");
        assert_eq!(history[1].content, "grounded answer");
        assert_eq!(history[1].sources, vec!["report.txt"]);
    }

    #[tokio::test]
    async fn history_is_replayed_into_later_prompts() {
        let fx = fixture().await;
        let session = fx.orchestrator.start_session("u1", None).await.unwrap();

        fx.orchestrator
            .answer("how did revenue do?", &corpus(), Some(&session))
            .await
            .unwrap();
        fx.orchestrator
            .answer("and the roadmap?", &corpus(), Some(&session))
            .await
            .unwrap();

        let messages = fx.generator.last_messages.lock().unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"how did revenue do?"));
        assert!(contents.contains(&"grounded answer"));
        assert_eq!(*contents.last().unwrap(), "and the roadmap?");
    }

    #[tokio::test]
    async fn generation_failure_leaves_history_untouched() {
        let (orchestrator, store, _dir) = fixture_with(Arc::new(FailingGenerator)).await;
        let session = orchestrator.start_session("u1", None).await.unwrap();

        let err = orchestrator
            .answer("how did revenue do?", &corpus(), Some(&session))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::GenerationUnavailable(_)));

        let history = store.recent_messages(&session, 10).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_for_unknown_session_is_not_found() {
        let fx = fixture().await;
        let err = fx.orchestrator.history("missing", 10).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
