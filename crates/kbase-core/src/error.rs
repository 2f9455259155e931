use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self { Self::NotFound(what.into()) }
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
    pub fn upstream(msg: impl std::fmt::Display) -> Self { Self::Upstream(msg.to_string()) }
    pub fn storage(msg: impl std::fmt::Display) -> Self { Self::Storage(msg.to_string()) }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }
    pub fn is_validation(&self) -> bool { matches!(self, Self::Validation(_)) }
}

pub type Result<T> = std::result::Result<T, Error>;
