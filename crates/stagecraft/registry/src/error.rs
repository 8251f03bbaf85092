//! Error types for stagecraft-registry.

use stagecraft_types::{ErrorKind, ResourceKey};
use thiserror::Error;

/// Errors that can occur in registry and lineage storage.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No record for the key.
    #[error("resource not found: {0}")]
    NotFound(ResourceKey),

    /// Requested state change is not allowed from the current state.
    #[error("invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: ResourceKey,
        from: &'static str,
        to: &'static str,
    },

    /// Backing file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document is malformed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) | RegistryError::InvalidTransition { .. } => {
                ErrorKind::Internal
            }
            RegistryError::Io(_) | RegistryError::Serialization(_) | RegistryError::Storage(_) => {
                ErrorKind::Storage
            }
        }
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
