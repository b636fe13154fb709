use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("invalid {entity}: {reason}")]
    Invalid { entity: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ControlError>;
