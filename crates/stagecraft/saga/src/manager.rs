//! Transaction manager
//!
//! Owns the journal and the live contexts of the process. Rollback walks a
//! transaction's operations in strict reverse registration order; a failing
//! compensation is recorded and the walk continues.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stagecraft_audit::{emit, AuditSink, PartialAuditEvent};
use stagecraft_types::{
    Compensation, CompensationExecutor, ErrorKind, OperationFailure, OperationId, OperationKind,
    OperationStatus, ResourceKey, RunId, Stage, TransactionId,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::context::TransactionContext;
use crate::error::{Result, SagaError};
use crate::journal::{replay, JournalEntry, TransactionJournal, TransactionSnapshot};
use crate::operation::TransactionStatus;

/// Outcome of rolling back one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub transaction_id: TransactionId,
    pub stage: Option<Stage>,
    /// Operations compensated, in the order the compensations ran
    pub compensated: Vec<OperationId>,
    pub failed: Vec<OperationFailure>,
    pub status: TransactionStatus,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct TransactionManager {
    journal: Arc<dyn TransactionJournal>,
    audit: Arc<dyn AuditSink>,
    transactions: DashMap<TransactionId, Arc<TransactionContext>>,
    runs: DashMap<RunId, Vec<TransactionId>>,
}

impl TransactionManager {
    pub fn new(journal: Arc<dyn TransactionJournal>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            journal,
            audit,
            transactions: DashMap::new(),
            runs: DashMap::new(),
        }
    }

    pub fn journal(&self) -> &Arc<dyn TransactionJournal> {
        &self.journal
    }

    /// Open a new transaction for one stage of a run.
    pub async fn begin(
        &self,
        run_id: RunId,
        stage: Option<Stage>,
        cancel: CancellationToken,
    ) -> Result<Arc<TransactionContext>> {
        let ctx = Arc::new(TransactionContext::new(
            run_id,
            stage.clone(),
            self.journal.clone(),
            self.audit.clone(),
            cancel,
        ));

        self.journal
            .append(&JournalEntry::TransactionBegun {
                transaction_id: ctx.id(),
                run_id,
                stage: stage.clone(),
                at: chrono::Utc::now(),
            })
            .await?;

        emit(
            self.audit.as_ref(),
            PartialAuditEvent::transaction(run_id, ctx.id(), None, "active"),
        )
        .await;

        info!(
            run_id = %run_id,
            transaction_id = %ctx.id(),
            stage = ?stage.as_ref().map(|s| s.as_str()),
            "Transaction begun"
        );

        self.track(ctx.clone());
        Ok(ctx)
    }

    /// Register a planned operation on `ctx`.
    pub async fn register(
        &self,
        ctx: &TransactionContext,
        kind: OperationKind,
        target: &ResourceKey,
        compensation: Compensation,
    ) -> Result<OperationId> {
        ctx.register_operation(kind, target, compensation).await
    }

    /// Mark `ctx` committed. Every operation must have committed.
    pub async fn commit(&self, ctx: &TransactionContext) -> Result<()> {
        let status = ctx.status();
        if status != TransactionStatus::Active {
            return Err(SagaError::NotActive {
                id: ctx.id(),
                status,
            });
        }
        let outstanding = ctx
            .operations()
            .iter()
            .filter(|op| op.status != OperationStatus::Committed)
            .count();
        if outstanding > 0 {
            return Err(SagaError::NotCommittable {
                id: ctx.id(),
                outstanding,
            });
        }

        ctx.set_status(TransactionStatus::Committed).await?;
        info!(transaction_id = %ctx.id(), "Transaction committed");
        Ok(())
    }

    /// Run compensations in reverse registration order.
    ///
    /// Compensations run even when the context was cancelled. Rolling back a
    /// transaction that already finished rollback is a no-op.
    #[instrument(skip(self, ctx, executor), fields(transaction_id = %ctx.id()))]
    pub async fn rollback(
        &self,
        ctx: &TransactionContext,
        executor: &dyn CompensationExecutor,
    ) -> Result<RollbackReport> {
        let mut report = RollbackReport {
            transaction_id: ctx.id(),
            stage: ctx.stage().cloned(),
            compensated: Vec::new(),
            failed: Vec::new(),
            status: ctx.status(),
        };
        if report.status.is_terminal() {
            return Ok(report);
        }

        ctx.set_status(TransactionStatus::RollingBack).await?;

        let mut operations = ctx.operations();
        operations.sort_by_key(|op| op.sequence);

        for op in operations.into_iter().rev() {
            if !op.status.needs_compensation() {
                continue;
            }

            let outcome = match &op.compensation {
                Compensation::None => Ok(()),
                compensation => executor.compensate(compensation).await,
            };

            match outcome {
                Ok(()) => {
                    let detail = match op.compensation {
                        Compensation::None => Some("no compensation registered".to_string()),
                        _ => None,
                    };
                    ctx.transition(op.id, OperationStatus::Compensated, detail)
                        .await?;
                    report.compensated.push(op.id);
                }
                Err(failure) => {
                    warn!(
                        operation_id = %op.id,
                        target = %op.target,
                        error = %failure,
                        "Compensation failed, continuing rollback"
                    );
                    ctx.transition(
                        op.id,
                        OperationStatus::CompensationFailed,
                        Some(failure.message.clone()),
                    )
                    .await?;
                    report.failed.push(OperationFailure {
                        operation_id: Some(op.id),
                        target: Some(op.target.clone()),
                        kind: ErrorKind::CompensationFailed,
                        message: failure.message,
                    });
                }
            }
        }

        report.status = if report.failed.is_empty() {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::PartiallyRolledBack
        };
        ctx.set_status(report.status).await?;

        info!(
            compensated = report.compensated.len(),
            failed = report.failed.len(),
            status = %report.status,
            "Rollback finished"
        );
        Ok(report)
    }

    /// Roll back every transaction the journal shows as interrupted.
    pub async fn recover(
        &self,
        executor: &dyn CompensationExecutor,
    ) -> Result<Vec<RollbackReport>> {
        let snapshots = self.snapshots().await?;
        let mut reports = Vec::new();
        for snapshot in snapshots.into_iter().rev() {
            if !snapshot.status.is_interrupted() {
                continue;
            }
            info!(
                transaction_id = %snapshot.id,
                run_id = %snapshot.run_id,
                status = %snapshot.status,
                "Recovering interrupted transaction"
            );
            let ctx = self.context_for(snapshot);
            reports.push(self.rollback(&ctx, executor).await?);
        }
        Ok(reports)
    }

    /// Roll back all transactions of a run, newest first, committed ones included.
    #[instrument(skip(self, executor), fields(run_id = %run_id))]
    pub async fn rollback_run(
        &self,
        run_id: RunId,
        executor: &dyn CompensationExecutor,
    ) -> Result<Vec<RollbackReport>> {
        let snapshots: Vec<_> = self
            .snapshots()
            .await?
            .into_iter()
            .filter(|s| s.run_id == run_id)
            .collect();

        let mut reports = Vec::new();
        for snapshot in snapshots.into_iter().rev() {
            if snapshot.status.is_terminal() {
                continue;
            }
            let ctx = self.context_for(snapshot);
            reports.push(self.rollback(&ctx, executor).await?);
        }
        Ok(reports)
    }

    /// Journal state of every transaction, in begin order.
    pub async fn snapshots(&self) -> Result<Vec<TransactionSnapshot>> {
        Ok(replay(&self.journal.entries().await?))
    }

    pub fn get(&self, id: TransactionId) -> Option<Arc<TransactionContext>> {
        self.transactions.get(&id).map(|ctx| ctx.clone())
    }

    /// Live contexts of a run, in begin order.
    pub fn transactions_for_run(&self, run_id: RunId) -> Vec<Arc<TransactionContext>> {
        self.runs
            .get(&run_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    fn context_for(&self, snapshot: TransactionSnapshot) -> Arc<TransactionContext> {
        if let Some(ctx) = self.get(snapshot.id) {
            return ctx;
        }
        let ctx = Arc::new(TransactionContext::restore(
            snapshot,
            self.journal.clone(),
            self.audit.clone(),
        ));
        self.track(ctx.clone());
        ctx
    }

    fn track(&self, ctx: Arc<TransactionContext>) {
        self.runs.entry(ctx.run_id()).or_default().push(ctx.id());
        self.transactions.insert(ctx.id(), ctx);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("transactions", &self.transactions.len())
            .finish()
    }
}
