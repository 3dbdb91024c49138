//! Application configuration.
//!
//! All sections have serde defaults so a missing or partial `config.toml`
//! still yields a runnable configuration. The data directory can be
//! overridden with `DOCCHAT_DATA_DIR`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::errors::CoreError;
use crate::ingest::chunker::ChunkConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub chunking: ChunkConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub vector: VectorConfig,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = env::var("DOCCHAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        Self { data_dir }
    }
}

impl StorageConfig {
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("docchat.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn ensure_dirs(&self) -> Result<(), CoreError> {
        for dir in [&self.data_dir, &self.upload_dir(), &self.log_dir()] {
            fs::create_dir_all(dir).map_err(CoreError::storage)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible endpoint serving `/v1/embeddings`.
    pub base_url: String,
    /// Model id. Ingestion and query paths share this; changing it
    /// invalidates every stored vector.
    pub model: String,
    pub dimension: usize,
    /// Chunks per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            model: "nomic-embed-text-v1.5".to_string(),
            dimension: 768,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible endpoint serving `/v1/chat/completions`.
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: i32,
    pub temperature: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            model: "default".to_string(),
            timeout_secs: 60,
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub url: String,
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6333".to_string(),
            collection: "documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Upper bound on retrieved chunks per query.
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_top_k: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Cap on total context characters included in a prompt.
    pub max_context_chars: usize,
    /// Prior session messages replayed into the prompt.
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 4000,
            history_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_file_bytes: usize,
    /// Retries for transient embedding/index failures before the document
    /// is marked failed.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` if given, otherwise from
    /// `<data_dir>/config.toml` when present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let default_path = StorageConfig::default().data_dir.join("config.toml");
        if default_path.exists() {
            return Self::from_file(&default_path);
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path).map_err(CoreError::storage)?;
        toml::from_str(&raw)
            .map_err(|e| CoreError::Storage(format!("invalid config {}: {}", path.display(), e)))
    }
}
