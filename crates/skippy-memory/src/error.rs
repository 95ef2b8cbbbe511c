use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("no memory for key '{key}' in scope '{scope}'")]
    NotFound { scope: String, key: String },

    #[error("skill '{0}' not found")]
    SkillNotFound(String),

    #[error("skill '{0}' already exists")]
    SkillExists(String),

    #[error("search query is empty")]
    QueryEmpty,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
