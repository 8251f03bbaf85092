//! Run outcomes, error kinds and process exit codes

use crate::ids::OperationId;
use crate::resource::ResourceKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process exit code for a completed run
pub const EXIT_COMPLETED: i32 = 0;
/// Process exit code for unexpected errors
pub const EXIT_ERROR: i32 = 1;
/// Process exit code when the failing stage was fully compensated
pub const EXIT_ROLLED_BACK: i32 = 2;
/// Process exit code when some compensation could not complete
pub const EXIT_PARTIALLY_FAILED: i32 = 3;
/// Process exit code for validation errors caught before execution
pub const EXIT_VALIDATION: i32 = 4;

/// State of a promotion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planned,
    InProgress,
    Completed,
    RolledBack,
    PartiallyFailed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::RolledBack | RunStatus::PartiallyFailed
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Planned, RunStatus::InProgress)
                | (RunStatus::InProgress, RunStatus::Completed)
                | (RunStatus::InProgress, RunStatus::RolledBack)
                | (RunStatus::InProgress, RunStatus::PartiallyFailed)
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed => EXIT_COMPLETED,
            RunStatus::RolledBack => EXIT_ROLLED_BACK,
            RunStatus::PartiallyFailed => EXIT_PARTIALLY_FAILED,
            RunStatus::Planned | RunStatus::InProgress => EXIT_ERROR,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Planned => "planned",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::RolledBack => "rolled_back",
            RunStatus::PartiallyFailed => "partially_failed",
        };
        f.write_str(s)
    }
}

/// Error taxonomy shared by every crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry budget exhausted on transient responses
    TransientRemote,
    /// Remote rejected the request (conflict, validation)
    NonTransientRemote,
    /// Call refused locally by an open circuit
    CircuitOpen,
    /// Credential rejected even after one refresh
    Unauthorized,
    /// Item kind not available on the capacity tier
    UnsupportedOnTier,
    /// Promotion skipped a stage
    StageLineageViolation,
    /// A rollback step could not complete
    CompensationFailed,
    /// Run cancelled or timed out
    Cancelled,
    /// Descriptor or configuration failed validation
    Validation,
    /// Registry/journal/lineage storage failure
    Storage,
    Internal,
}

impl ErrorKind {
    /// Caught before any remote call was issued
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::StageLineageViolation | ErrorKind::UnsupportedOnTier | ErrorKind::Validation
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientRemote => "transient_remote",
            ErrorKind::NonTransientRemote => "non_transient_remote",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::UnsupportedOnTier => "unsupported_on_tier",
            ErrorKind::StageLineageViolation => "stage_lineage_violation",
            ErrorKind::CompensationFailed => "compensation_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Validation => "validation",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// One failed operation surfaced in a run result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub operation_id: Option<OperationId>,
    pub target: Option<ResourceKey>,
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation_id: None,
            target: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    pub fn with_target(mut self, target: ResourceKey) -> Self {
        self.target = Some(target);
        self
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[{}] {}: {}", self.kind, target, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for OperationFailure {}
