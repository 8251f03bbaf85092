//! Saga error types

use stagecraft_types::{
    ErrorKind, OperationFailure, OperationId, OperationStatus, TransactionId,
};
use thiserror::Error;

use crate::operation::TransactionStatus;

#[derive(Debug, Error)]
pub enum SagaError {
    /// Cancellation observed before registering a new operation
    #[error("transaction {0} cancelled")]
    Cancelled(TransactionId),

    #[error("transaction {id} is {status}, expected active")]
    NotActive {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("transaction {id} has {outstanding} operations not committed")]
    NotCommittable { id: TransactionId, outstanding: usize },

    #[error("unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("unknown operation: {0}")]
    UnknownOperation(OperationId),

    #[error("invalid transition for {operation}: {from} -> {to}")]
    InvalidTransition {
        operation: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Cancelled(_) => ErrorKind::Cancelled,
            SagaError::Io(_) | SagaError::Serialization(_) => ErrorKind::Storage,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<SagaError> for OperationFailure {
    fn from(e: SagaError) -> Self {
        OperationFailure::new(e.kind(), e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
