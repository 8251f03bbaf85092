//! Seams between the provisioner and the transaction manager.

use async_trait::async_trait;

use crate::ids::OperationId;
use crate::operation::{Compensation, OperationKind};
use crate::outcome::OperationFailure;
use crate::resource::ResourceKey;

/// Write-ahead log for mutating operations.
///
/// Callers must `register` (with the compensation) and `begin` before the
/// forward action runs, then `complete` with its outcome.
#[async_trait]
pub trait OperationLog: Send + Sync {
    /// Durably record a planned operation and how to undo it.
    async fn register(
        &self,
        kind: OperationKind,
        target: &ResourceKey,
        compensation: Compensation,
    ) -> Result<OperationId, OperationFailure>;

    /// Forward action is about to run.
    async fn begin(&self, id: OperationId) -> Result<(), OperationFailure>;

    /// Forward action finished. A failed action stays eligible for compensation.
    async fn complete(
        &self,
        id: OperationId,
        outcome: Result<(), &OperationFailure>,
    ) -> Result<(), OperationFailure>;
}

/// Runs compensations during rollback.
#[async_trait]
pub trait CompensationExecutor: Send + Sync {
    async fn compensate(&self, compensation: &Compensation) -> Result<(), OperationFailure>;
}
