//! Engine error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("Assignment '{0}' not found")]
    NotFound(String),
    #[error("Failed to provision environment: {0}")]
    Provision(String),
    #[error("Invalid assignment metadata: {0}")]
    Metadata(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Metadata(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
