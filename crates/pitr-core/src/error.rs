//! Error taxonomy for the PITR engine

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PitrError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server query failed: {0}")]
    ServerQuery(String),

    #[error("tool invocation failed: {0}")]
    ToolInvocation(String),

    #[error("filesystem error: {0}")]
    FileSystem(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("size mismatch for {file}: downloaded {downloaded} bytes, server reports {expected} bytes")]
    SizeMismatch {
        file: String,
        downloaded: i64,
        expected: i64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PitrError>;

impl From<std::io::Error> for PitrError {
    fn from(err: std::io::Error) -> Self {
        PitrError::FileSystem(err.to_string())
    }
}

impl From<anyhow::Error> for PitrError {
    fn from(err: anyhow::Error) -> Self {
        PitrError::ToolInvocation(err.to_string())
    }
}
