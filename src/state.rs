//! Application wiring.
//!
//! `AppState::new` builds the production graph (SQLite record store, Qdrant
//! index, one shared OpenAI-compatible client for embedding and generation)
//! and hands out the pipeline, retrieval engine and chat orchestrator.
//! `with_components` accepts arbitrary trait objects instead, for tests and
//! alternative backends.

use std::sync::Arc;

use crate::chat::ChatOrchestrator;
use crate::core::config::AppConfig;
use crate::core::errors::CoreError;
use crate::ingest::IngestionPipeline;
use crate::llm::{Embedder, Generator, OpenAiCompatClient};
use crate::retrieval::RetrievalEngine;
use crate::store::{DocumentStore, SqliteStore};
use crate::vector::{QdrantIndex, VectorIndex};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub pipeline: Arc<IngestionPipeline>,
    pub retrieval: Arc<RetrievalEngine>,
    pub chat: Arc<ChatOrchestrator>,
}

impl AppState {
    /// Build the production wiring from configuration. Creates the data
    /// directories, opens the database and ensures the vector collection
    /// exists with the configured embedding dimension.
    pub async fn new(config: AppConfig) -> Result<Self, CoreError> {
        config.storage.ensure_dirs()?;

        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteStore::new(config.storage.db_path()).await?);

        let index = QdrantIndex::new(config.vector.clone());
        index.ensure_collection(config.embedding.dimension).await?;
        let index: Arc<dyn VectorIndex> = Arc::new(index);

        let client = Arc::new(OpenAiCompatClient::new(
            config.embedding.clone(),
            config.generation.clone(),
        ));
        let embedder: Arc<dyn Embedder> = client.clone();
        let generator: Arc<dyn Generator> = client;

        Ok(Self::with_components(
            config, store, index, embedder, generator,
        ))
    }

    /// Wire the state from caller-supplied components.
    pub fn with_components(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            &config,
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            index,
            embedder,
            config.retrieval.clone(),
        ));
        let chat = Arc::new(ChatOrchestrator::new(
            store.clone(),
            retrieval.clone(),
            generator,
            &config,
        ));

        Self {
            config: Arc::new(config),
            store,
            pipeline,
            retrieval,
            chat,
        }
    }
}
