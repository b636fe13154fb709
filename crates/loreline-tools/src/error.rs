use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Error type string carried on the wire. Validation errors are never
    /// retried by clients.
    pub fn error_type(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "ToolNotFound",
            ToolError::Validation(_) => "ValidationError",
            ToolError::NotFound { .. } => "NotFound",
            ToolError::Database(_) => "DatabaseError",
            ToolError::Serialization(_) => "SerializationError",
            ToolError::Internal(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
