use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkippyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data directory missing: {0}")]
    DataDirMissing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SkippyError>;
