//! Audit error types

use stagecraft_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit sink error: {0}")]
    Sink(String),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
