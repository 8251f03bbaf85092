//! Run results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagecraft_provisioner::{PlannedAction, Provisioned};
use stagecraft_saga::RollbackReport;
use stagecraft_types::{
    ArtifactVersion, OperationFailure, RemoteId, ResourceKey, RunId, RunStatus, Stage,
    TransactionId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Committed,
    RolledBack,
    /// Rolled back with at least one failed compensation
    PartiallyRolledBack,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Committed => "committed",
            StageOutcome::RolledBack => "rolled_back",
            StageOutcome::PartiallyRolledBack => "partially_rolled_back",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub key: ResourceKey,
    pub remote_id: Option<RemoteId>,
    /// `false` when the resource already existed
    pub created: bool,
}

impl From<&Provisioned> for ResourceOutcome {
    fn from(p: &Provisioned) -> Self {
        Self {
            key: p.record.key.clone(),
            remote_id: p.record.remote_id.clone(),
            created: p.created,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub transaction_id: Option<TransactionId>,
    pub resources: Vec<ResourceOutcome>,
    /// Forward failure that stopped the stage
    pub failure: Option<OperationFailure>,
    pub rollback: Option<RollbackReport>,
}

impl StageReport {
    pub fn created_count(&self) -> usize {
        self.resources.iter().filter(|r| r.created).count()
    }
}

/// Terminal result of a promotion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub run_id: RunId,
    pub artifact_version: ArtifactVersion,
    pub status: RunStatus,
    pub stages: Vec<StageReport>,
    /// Every failed operation: the forward failure plus any compensation
    /// that could not complete
    pub failures: Vec<OperationFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionReport {
    pub fn new(run_id: RunId, artifact_version: ArtifactVersion) -> Self {
        Self {
            run_id,
            artifact_version,
            status: RunStatus::Planned,
            stages: Vec::new(),
            failures: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn committed_stages(&self) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Committed)
            .map(|s| &s.stage)
            .collect()
    }
}

/// Result of an explicit full-run rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRollbackReport {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Newest transaction first
    pub transactions: Vec<RollbackReport>,
    pub lineage_removed: usize,
    pub failures: Vec<OperationFailure>,
}

impl RunRollbackReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Dry-run output of [`plan`](crate::PromotionOrchestrator::plan)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionPlan {
    pub artifact_version: ArtifactVersion,
    pub stages: Vec<StagePlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePlan {
    pub stage: Stage,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub key: ResourceKey,
    #[serde(flatten)]
    pub action: PlannedAction,
}

impl PromotionPlan {
    /// Resources that would be created
    pub fn creations(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| &s.steps)
            .filter(|step| step.action == PlannedAction::Create)
            .count()
    }
}
