use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("evidence not found: {0}")]
    NotFound(String),
}

/// Errors internal to the vector index. Callers of the retriever never see
/// these; they are converted to fallback reasons.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector index request failed: {0}")]
    Request(String),
}

pub type Result<T> = std::result::Result<T, EvidenceError>;
