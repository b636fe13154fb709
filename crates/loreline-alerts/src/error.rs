use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] loreline_ledger::LedgerError),

    #[error("control plane error: {0}")]
    Control(#[from] loreline_control::ControlError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

pub type Result<T> = std::result::Result<T, AlertError>;
