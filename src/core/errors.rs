use thiserror::Error;

/// Error taxonomy for the document Q&A core.
///
/// Ingestion-side errors are caught at the pipeline boundary and become the
/// document's terminal `failed` detail; retrieval and chat errors surface
/// synchronously to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("corrupt input: {0}")]
    CorruptInput(String),
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        CoreError::Storage(err.to_string())
    }

    /// Transient external-service failures the pipeline may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::EmbeddingUnavailable(_) | CoreError::IndexUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::EmbeddingUnavailable("down".into()).is_retryable());
        assert!(CoreError::IndexUnavailable("down".into()).is_retryable());
        assert!(!CoreError::CorruptInput("bad pdf".into()).is_retryable());
        assert!(!CoreError::GenerationUnavailable("timeout".into()).is_retryable());
    }
}
