//! Transaction context

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use stagecraft_audit::{emit, AuditSink, PartialAuditEvent};
use stagecraft_types::{
    Compensation, OperationFailure, OperationId, OperationKind, OperationLog,
    OperationStatus, ResourceKey, RunId, Stage, TransactionId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SagaError};
use crate::journal::{JournalEntry, TransactionJournal, TransactionSnapshot};
use crate::operation::{Operation, TransactionStatus};

/// Ordered operations of one transaction (one stage of one run).
///
/// Every status change is journaled before it takes effect in memory, then
/// mirrored to the audit sink.
pub struct TransactionContext {
    id: TransactionId,
    run_id: RunId,
    stage: Option<Stage>,
    journal: Arc<dyn TransactionJournal>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
    status: Mutex<TransactionStatus>,
    operations: Mutex<Vec<Operation>>,
}

impl TransactionContext {
    pub(crate) fn new(
        run_id: RunId,
        stage: Option<Stage>,
        journal: Arc<dyn TransactionJournal>,
        audit: Arc<dyn AuditSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            run_id,
            stage,
            journal,
            audit,
            cancel,
            status: Mutex::new(TransactionStatus::Active),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Rebuild a context from the journal, e.g. after a crash.
    pub(crate) fn restore(
        snapshot: TransactionSnapshot,
        journal: Arc<dyn TransactionJournal>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            id: snapshot.id,
            run_id: snapshot.run_id,
            stage: snapshot.stage,
            journal,
            audit,
            cancel: CancellationToken::new(),
            status: Mutex::new(snapshot.status),
            operations: Mutex::new(snapshot.operations),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn stage(&self) -> Option<&Stage> {
        self.stage.as_ref()
    }

    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Snapshot of all operations in registration order.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().clone()
    }

    pub fn operation(&self, id: OperationId) -> Option<Operation> {
        self.operations.lock().iter().find(|op| op.id == id).cloned()
    }

    /// Record a planned operation with its compensation.
    pub async fn register_operation(
        &self,
        kind: OperationKind,
        target: &ResourceKey,
        compensation: Compensation,
    ) -> Result<OperationId> {
        if self.cancel.is_cancelled() {
            return Err(SagaError::Cancelled(self.id));
        }
        let status = self.status();
        if status != TransactionStatus::Active {
            return Err(SagaError::NotActive { id: self.id, status });
        }

        let now = Utc::now();
        let operation = Operation {
            id: OperationId::generate(),
            transaction_id: self.id,
            run_id: self.run_id,
            sequence: self.operations.lock().len() as u32,
            kind,
            target: target.clone(),
            compensation,
            status: OperationStatus::Planned,
            error: None,
            registered_at: now,
            updated_at: now,
        };

        self.journal
            .append(&JournalEntry::OperationRegistered {
                operation: operation.clone(),
            })
            .await?;
        self.operations.lock().push(operation.clone());

        debug!(
            transaction_id = %self.id,
            operation_id = %operation.id,
            target = %target,
            compensation = %operation.compensation.describe(),
            "Operation registered"
        );
        let detail = operation.compensation.describe();
        self.audit_operation(&operation, None, OperationStatus::Planned, detail)
            .await;

        Ok(operation.id)
    }

    /// Move an operation to `to`, journaling first.
    pub(crate) async fn transition(
        &self,
        id: OperationId,
        to: OperationStatus,
        error: Option<String>,
    ) -> Result<Operation> {
        let current = self.operation(id).ok_or(SagaError::UnknownOperation(id))?;
        // A failed forward action records its error without changing status
        if current.status != to && !current.status.can_transition_to(to) {
            return Err(SagaError::InvalidTransition {
                operation: id,
                from: current.status,
                to,
            });
        }

        let now = Utc::now();
        self.journal
            .append(&JournalEntry::OperationStatusChanged {
                transaction_id: self.id,
                operation_id: id,
                status: to,
                error: error.clone(),
                at: now,
            })
            .await?;

        let updated = {
            let mut operations = self.operations.lock();
            let op = operations
                .iter_mut()
                .find(|op| op.id == id)
                .ok_or(SagaError::UnknownOperation(id))?;
            op.status = to;
            if error.is_some() {
                op.error = error.clone();
            }
            op.updated_at = now;
            op.clone()
        };

        let detail = error.unwrap_or_else(|| updated.describe());
        self.audit_operation(&updated, Some(current.status), to, detail)
            .await;
        Ok(updated)
    }

    pub(crate) async fn set_status(&self, status: TransactionStatus) -> Result<()> {
        let from = self.status();
        self.journal
            .append(&JournalEntry::TransactionStatusChanged {
                transaction_id: self.id,
                status,
                at: Utc::now(),
            })
            .await?;
        *self.status.lock() = status;

        let from = from.to_string();
        emit(
            self.audit.as_ref(),
            PartialAuditEvent::transaction(self.run_id, self.id, Some(&from), &status.to_string()),
        )
        .await;
        Ok(())
    }

    /// Write-ahead wrapper: register, begin, run `forward`, complete.
    ///
    /// If registration fails `forward` never runs.
    pub async fn execute<T, Fut>(
        &self,
        kind: OperationKind,
        target: &ResourceKey,
        compensation: Compensation,
        forward: Fut,
    ) -> std::result::Result<T, OperationFailure>
    where
        Fut: Future<Output = std::result::Result<T, OperationFailure>> + Send,
        T: Send,
    {
        let id = self.register(kind, target, compensation).await?;
        self.begin(id).await?;
        match forward.await {
            Ok(value) => {
                self.complete(id, Ok(())).await?;
                Ok(value)
            }
            Err(failure) => {
                let failure = failure.with_operation(id);
                if let Err(e) = self.complete(id, Err(&failure)).await {
                    warn!(operation_id = %id, error = %e, "Failed to journal forward failure");
                }
                Err(failure)
            }
        }
    }

    async fn audit_operation(
        &self,
        operation: &Operation,
        from: Option<OperationStatus>,
        to: OperationStatus,
        detail: String,
    ) {
        emit(
            self.audit.as_ref(),
            PartialAuditEvent::operation(
                self.run_id,
                self.id,
                operation.id,
                operation.kind,
                operation.target.clone(),
                from,
                to,
            )
            .detail(detail),
        )
        .await;
    }
}

#[async_trait]
impl OperationLog for TransactionContext {
    async fn register(
        &self,
        kind: OperationKind,
        target: &ResourceKey,
        compensation: Compensation,
    ) -> std::result::Result<OperationId, OperationFailure> {
        self.register_operation(kind, target, compensation)
            .await
            .map_err(|e| OperationFailure::from(e).with_target(target.clone()))
    }

    async fn begin(&self, id: OperationId) -> std::result::Result<(), OperationFailure> {
        self.transition(id, OperationStatus::Executing, None)
            .await
            .map(|_| ())
            .map_err(|e| OperationFailure::from(e).with_operation(id))
    }

    async fn complete(
        &self,
        id: OperationId,
        outcome: std::result::Result<(), &OperationFailure>,
    ) -> std::result::Result<(), OperationFailure> {
        let result = match outcome {
            Ok(()) => self.transition(id, OperationStatus::Committed, None).await,
            // Stays Executing so rollback still compensates it
            Err(failure) => {
                self.transition(
                    id,
                    OperationStatus::Executing,
                    Some(format!("forward action failed: {failure}")),
                )
                .await
            }
        };
        result
            .map(|_| ())
            .map_err(|e| OperationFailure::from(e).with_operation(id))
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("run_id", &self.run_id)
            .field("stage", &self.stage)
            .field("status", &self.status())
            .field("operations", &self.operations.lock().len())
            .finish()
    }
}
