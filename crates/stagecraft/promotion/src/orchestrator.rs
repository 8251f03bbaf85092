//! Promotion Orchestrator
//!
//! Drives one run through `Planned -> InProgress -> {Completed, RolledBack,
//! PartiallyFailed}`. Each stage gets its own transaction; a failure rolls
//! back only the failing stage. Stages committed earlier in the run keep
//! their resources and lineage until [`rollback_run`](PromotionOrchestrator::rollback_run)
//! is called explicitly.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use stagecraft_audit::{emit, AuditSink, PartialAuditEvent};
use stagecraft_provisioner::{role_key, validate_name, PlannedAction, Provisioner};
use stagecraft_registry::{LineageStore, RegistryError};
use stagecraft_saga::{RollbackReport, TransactionContext, TransactionManager, TransactionStatus};
use stagecraft_types::{
    ArtifactVersion, ErrorKind, OperationFailure, ResourceKind, RunId, RunStatus, Stage,
    StageLineage,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::PromotionConfig;
use crate::error::{PromotionError, Result};
use crate::report::{
    PlannedStep, PromotionPlan, PromotionReport, ResourceOutcome, RunRollbackReport, StageOutcome,
    StagePlan, StageReport,
};
use crate::request::PromotionRequest;

pub struct PromotionOrchestrator {
    config: PromotionConfig,
    provisioner: Provisioner,
    transactions: Arc<TransactionManager>,
    lineage: Arc<dyn LineageStore>,
    audit: Arc<dyn AuditSink>,
    /// Reports of runs started by this process
    runs: DashMap<RunId, PromotionReport>,
}

impl PromotionOrchestrator {
    pub fn new(
        config: PromotionConfig,
        provisioner: Provisioner,
        transactions: Arc<TransactionManager>,
        lineage: Arc<dyn LineageStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            provisioner,
            transactions,
            lineage,
            audit,
            runs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn lineage_store(&self) -> &Arc<dyn LineageStore> {
        &self.lineage
    }

    /// Dry run: the same checks as [`promote`](Self::promote) plus what each
    /// resource would need. Makes no remote calls and reserves nothing.
    pub async fn plan(&self, request: &PromotionRequest) -> Result<PromotionPlan> {
        self.validate(request).await?;

        let mut stages = Vec::with_capacity(request.stages.len());
        for stage in &request.stages {
            let mut steps = Vec::new();
            for descriptor in request.artifact.provisioning_order() {
                let Some(spec) = descriptor.resolve(stage) else {
                    continue;
                };
                let key = descriptor.key_for(stage);
                let action = self.provisioner.preview(&key, &spec).await.map_err(|source| {
                    PromotionError::InvalidDescriptor {
                        stage: stage.clone(),
                        key: key.clone(),
                        source,
                    }
                })?;
                steps.push(PlannedStep {
                    key: key.clone(),
                    action,
                });

                if descriptor.kind == ResourceKind::Workspace {
                    for assignment in descriptor.roles_for(stage) {
                        let role = role_key(&key, assignment);
                        let action = match self
                            .provisioner
                            .registry()
                            .get(&role)
                            .await?
                            .and_then(|r| r.live_remote_id().cloned())
                        {
                            Some(remote_id) => PlannedAction::Exists { remote_id },
                            None => PlannedAction::Create,
                        };
                        steps.push(PlannedStep { key: role, action });
                    }
                }
            }
            stages.push(StagePlan {
                stage: stage.clone(),
                steps,
            });
        }

        Ok(PromotionPlan {
            artifact_version: request.artifact.version.clone(),
            stages,
        })
    }

    pub async fn promote(&self, request: PromotionRequest) -> Result<PromotionReport> {
        self.promote_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run a promotion. Cancelling `cancel` (or hitting the configured run
    /// timeout) stops the run at the next operation boundary and rolls back
    /// the current stage.
    ///
    /// Validation problems are returned as errors before the run starts.
    /// Everything after that is reported in the returned [`PromotionReport`].
    #[instrument(skip(self, request, cancel), fields(version = %request.artifact.version))]
    pub async fn promote_with_cancel(
        &self,
        request: PromotionRequest,
        cancel: CancellationToken,
    ) -> Result<PromotionReport> {
        let run_id = RunId::generate();
        let mut report = PromotionReport::new(run_id, request.artifact.version.clone());
        emit(self.audit.as_ref(), PartialAuditEvent::run(run_id, None, RunStatus::Planned)).await;

        if let Err(e) = self.validate(&request).await {
            warn!(run_id = %run_id, error = %e, "Promotion rejected");
            return Err(e);
        }

        self.transition(&mut report, RunStatus::InProgress).await;
        info!(
            run_id = %run_id,
            stages = ?request.stages.iter().map(Stage::as_str).collect::<Vec<_>>(),
            "Promotion started"
        );

        // Scoped to this run so a timeout never cancels a token shared by others
        let run_cancel = cancel.child_token();
        let timer = self.config.run_timeout().map(|timeout| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "Run timeout reached, cancelling");
                token.cancel();
            })
        });

        let mut final_status = RunStatus::Completed;
        for stage in &request.stages {
            let stage_report = self.run_stage(run_id, &request, stage, &run_cancel).await;
            report.failures.extend(stage_report.failure.iter().cloned());
            if let Some(rollback) = &stage_report.rollback {
                report.failures.extend(rollback.failed.iter().cloned());
            }

            let outcome = stage_report.outcome;
            report.stages.push(stage_report);
            match outcome {
                StageOutcome::Committed => {
                    if let Err(e) = self
                        .record_lineage(run_id, &request.artifact.version, stage)
                        .await
                    {
                        error!(stage = %stage, error = %e, "Stage committed but lineage not recorded");
                        report.failures.push(OperationFailure::new(
                            e.kind(),
                            format!("lineage for stage {stage} not recorded: {e}"),
                        ));
                        final_status = RunStatus::PartiallyFailed;
                        break;
                    }
                }
                StageOutcome::RolledBack => {
                    final_status = RunStatus::RolledBack;
                    break;
                }
                StageOutcome::PartiallyRolledBack => {
                    final_status = RunStatus::PartiallyFailed;
                    break;
                }
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        report.finished_at = Some(Utc::now());
        self.transition(&mut report, final_status).await;
        info!(
            run_id = %run_id,
            status = %report.status,
            failures = report.failures.len(),
            "Promotion finished"
        );

        self.runs.insert(run_id, report.clone());
        Ok(report)
    }

    /// Explicitly roll back every stage of a run, newest first, and remove
    /// the lineage it wrote.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn rollback_run(&self, run_id: RunId) -> Result<RunRollbackReport> {
        let transactions = self
            .transactions
            .rollback_run(run_id, &self.provisioner)
            .await?;
        if transactions.is_empty() && !self.runs.contains_key(&run_id) {
            let known = self
                .transactions
                .snapshots()
                .await?
                .iter()
                .any(|s| s.run_id == run_id);
            if !known {
                return Err(PromotionError::UnknownRun(run_id));
            }
        }

        let lineage_removed = self.lineage.remove_run(run_id).await?;
        let failures: Vec<OperationFailure> = transactions
            .iter()
            .flat_map(|t| t.failed.iter().cloned())
            .collect();
        let status = if failures.is_empty() {
            RunStatus::RolledBack
        } else {
            RunStatus::PartiallyFailed
        };

        let previous = self.runs.get(&run_id).map(|r| r.status);
        if let Some(mut stored) = self.runs.get_mut(&run_id) {
            stored.status = status;
            stored.failures.extend(failures.iter().cloned());
        }
        emit(
            self.audit.as_ref(),
            PartialAuditEvent::run(run_id, previous, status).detail("explicit run rollback"),
        )
        .await;

        info!(
            transactions = transactions.len(),
            lineage_removed,
            status = %status,
            "Run rolled back"
        );
        Ok(RunRollbackReport {
            run_id,
            status,
            transactions,
            lineage_removed,
            failures,
        })
    }

    /// Roll back transactions left behind by an interrupted process.
    pub async fn recover(&self) -> Result<Vec<RollbackReport>> {
        Ok(self.transactions.recover(&self.provisioner).await?)
    }

    /// Stored report of a run started by this process.
    pub fn run(&self, run_id: RunId) -> Option<PromotionReport> {
        self.runs.get(&run_id).map(|r| r.clone())
    }

    pub async fn lineage(&self, version: &ArtifactVersion) -> Result<Vec<StageLineage>> {
        Ok(self.lineage.history(version).await?)
    }

    /// Checks that must pass before `Planned -> InProgress`, in order:
    /// stage shape, lineage, then every descriptor at every target stage.
    async fn validate(&self, request: &PromotionRequest) -> Result<()> {
        let sequence = &self.config.stages;

        let first = request.first_stage().ok_or(PromotionError::NoStages)?;
        let mut previous: Option<usize> = None;
        for stage in &request.stages {
            let index = sequence
                .index_of(stage)
                .ok_or_else(|| PromotionError::UnknownStage(stage.clone()))?;
            if previous.is_some_and(|p| index != p + 1) {
                return Err(PromotionError::NonContiguousStages(request.stages.clone()));
            }
            previous = Some(index);
        }

        if let Some(required) = sequence.predecessor(first) {
            let version = &request.artifact.version;
            if !self.lineage.has_stage(version, required).await? {
                return Err(PromotionError::StageLineageViolation {
                    version: version.clone(),
                    stage: first.clone(),
                    required: required.clone(),
                });
            }
        }

        if request.artifact.resources.is_empty() {
            return Err(PromotionError::EmptyBundle(request.artifact.version.clone()));
        }

        for stage in &request.stages {
            self.validate_stage(request, stage).await?;
        }
        Ok(())
    }

    async fn validate_stage(&self, request: &PromotionRequest, stage: &Stage) -> Result<()> {
        let bundle = &request.artifact;
        for descriptor in &bundle.resources {
            let Some(spec) = descriptor.resolve(stage) else {
                continue;
            };
            let key = descriptor.key_for(stage);
            let invalid = |source| PromotionError::InvalidDescriptor {
                stage: stage.clone(),
                key: key.clone(),
                source,
            };

            self.provisioner.validate(&key, &spec).map_err(invalid)?;
            for assignment in descriptor.roles_for(stage) {
                validate_name(&assignment.principal.id).map_err(invalid)?;
            }

            // Parent must be provisioned in this stage or already exist
            if let Some(parent) = &spec.parent {
                let in_bundle = bundle.resources.iter().any(|d| {
                    d.kind == ResourceKind::Workspace
                        && d.logical_name == parent.logical_name
                        && d.resolve(stage).is_some()
                });
                let existing = self
                    .provisioner
                    .registry()
                    .get(parent)
                    .await?
                    .is_some_and(|r| r.is_created());
                if !in_bundle && !existing {
                    return Err(invalid(stagecraft_provisioner::ProvisionError::MissingParent {
                        key: key.clone(),
                        parent: parent.clone(),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Provision one stage inside its own transaction. Never fails: problems
    /// end up in the returned report.
    #[instrument(skip(self, request, cancel), fields(run_id = %run_id, stage = %stage))]
    async fn run_stage(
        &self,
        run_id: RunId,
        request: &PromotionRequest,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> StageReport {
        emit(
            self.audit.as_ref(),
            PartialAuditEvent::stage(run_id, stage.clone(), None, "started"),
        )
        .await;

        let mut report = StageReport {
            stage: stage.clone(),
            outcome: StageOutcome::RolledBack,
            transaction_id: None,
            resources: Vec::new(),
            failure: None,
            rollback: None,
        };

        if cancel.is_cancelled() {
            report.failure = Some(cancelled(stage));
            self.finish_stage(run_id, &report).await;
            return report;
        }

        let ctx = match self
            .transactions
            .begin(run_id, Some(stage.clone()), cancel.clone())
            .await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                report.failure = Some(OperationFailure::from(e));
                self.finish_stage(run_id, &report).await;
                return report;
            }
        };
        report.transaction_id = Some(ctx.id());

        report.failure = self
            .provision_stage(request, stage, &ctx, cancel, &mut report.resources)
            .await;

        if report.failure.is_none() {
            match self.transactions.commit(&ctx).await {
                Ok(()) => {
                    report.outcome = StageOutcome::Committed;
                    self.finish_stage(run_id, &report).await;
                    return report;
                }
                Err(e) => report.failure = Some(OperationFailure::from(e)),
            }
        }

        if let Some(failure) = &report.failure {
            warn!(error = %failure, "Stage failed, rolling back");
        }
        match self.transactions.rollback(&ctx, &self.provisioner).await {
            Ok(rollback) => {
                report.outcome = match rollback.status {
                    TransactionStatus::RolledBack => StageOutcome::RolledBack,
                    _ => StageOutcome::PartiallyRolledBack,
                };
                report.rollback = Some(rollback);
            }
            Err(e) => {
                warn!(error = %e, "Rollback could not complete");
                report.outcome = StageOutcome::PartiallyRolledBack;
                report.rollback = Some(RollbackReport {
                    transaction_id: ctx.id(),
                    stage: Some(stage.clone()),
                    compensated: Vec::new(),
                    failed: vec![OperationFailure::new(
                        ErrorKind::CompensationFailed,
                        format!("rollback interrupted: {e}"),
                    )],
                    status: ctx.status(),
                });
            }
        }

        self.finish_stage(run_id, &report).await;
        report
    }

    /// Workspaces first, each followed by its role assignments, then items.
    /// Returns the first failure.
    async fn provision_stage(
        &self,
        request: &PromotionRequest,
        stage: &Stage,
        ctx: &TransactionContext,
        cancel: &CancellationToken,
        resources: &mut Vec<ResourceOutcome>,
    ) -> Option<OperationFailure> {
        for descriptor in request.artifact.provisioning_order() {
            if cancel.is_cancelled() {
                return Some(cancelled(stage));
            }
            let Some(spec) = descriptor.resolve(stage) else {
                continue;
            };
            let key = descriptor.key_for(stage);

            match self.provisioner.ensure(&key, &spec, ctx).await {
                Ok(provisioned) => resources.push(ResourceOutcome::from(&provisioned)),
                Err(e) => return Some(e.to_failure(&key)),
            }

            if descriptor.kind != ResourceKind::Workspace {
                continue;
            }
            for assignment in descriptor.roles_for(stage) {
                if cancel.is_cancelled() {
                    return Some(cancelled(stage));
                }
                match self.provisioner.assign_role(&key, assignment, ctx).await {
                    Ok(provisioned) => resources.push(ResourceOutcome::from(&provisioned)),
                    Err(e) => return Some(e.to_failure(&role_key(&key, assignment))),
                }
            }
        }
        None
    }

    async fn record_lineage(
        &self,
        run_id: RunId,
        version: &ArtifactVersion,
        stage: &Stage,
    ) -> std::result::Result<(), RegistryError> {
        if self.lineage.has_stage(version, stage).await? {
            return Ok(());
        }
        let entry = StageLineage {
            artifact_version: version.clone(),
            stage: stage.clone(),
            promoted_at: Utc::now(),
            source_stage: self.config.stages.predecessor(stage).cloned(),
            run_id,
        };
        self.lineage.append(entry).await
    }

    async fn finish_stage(&self, run_id: RunId, report: &StageReport) {
        let mut event = PartialAuditEvent::stage(
            run_id,
            report.stage.clone(),
            Some("started"),
            report.outcome.as_str(),
        )
        .context("resources", report.resources.len());
        if let Some(failure) = &report.failure {
            event = event.detail(failure.to_string());
        }
        emit(self.audit.as_ref(), event).await;
    }

    async fn transition(&self, report: &mut PromotionReport, to: RunStatus) {
        let from = report.status;
        if !from.can_transition_to(to) {
            warn!(run_id = %report.run_id, from = %from, to = %to, "Unexpected run transition");
        }
        report.status = to;
        emit(
            self.audit.as_ref(),
            PartialAuditEvent::run(report.run_id, Some(from), to),
        )
        .await;
    }
}

impl std::fmt::Debug for PromotionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionOrchestrator")
            .field("config", &self.config)
            .field("runs", &self.runs.len())
            .finish()
    }
}

fn cancelled(stage: &Stage) -> OperationFailure {
    OperationFailure::new(
        ErrorKind::Cancelled,
        format!("run cancelled during stage {stage}"),
    )
}
