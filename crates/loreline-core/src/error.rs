use thiserror::Error;

#[derive(Debug, Error)]
pub enum LorelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {entity} {id}")]
    NotFound { entity: String, id: String },

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Tool error ({tool}): {reason}")]
    Tool { tool: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LorelineError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            LorelineError::Config(_) => "CONFIG_ERROR",
            LorelineError::Validation(_) => "VALIDATION_ERROR",
            LorelineError::NotFound { .. } => "NOT_FOUND",
            LorelineError::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            LorelineError::Database(_) => "DATABASE_ERROR",
            LorelineError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            LorelineError::Tool { .. } => "TOOL_ERROR",
            LorelineError::Serialization(_) => "SERIALIZATION_ERROR",
            LorelineError::Io(_) => "IO_ERROR",
            LorelineError::Timeout { .. } => "TIMEOUT",
            LorelineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LorelineError>;
