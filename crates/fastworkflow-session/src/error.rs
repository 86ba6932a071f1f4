use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Workflow not found: {id}")]
    NotFound { id: String },

    #[error("Root command context can only be set once per workflow")]
    RootAlreadySet,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
