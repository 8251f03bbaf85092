//! Operation kinds, lifecycle states and compensation descriptors
//!
//! Compensations are plain data so they can be journaled before the forward
//! action runs and rebuilt after a crash.

use crate::resource::ResourceKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an operation does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Assign,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Assign => write!(f, "assign"),
        }
    }
}

/// Lifecycle of a registered operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Registered with its compensation; forward action not started
    Planned,
    /// Forward action in flight (or failed mid-flight)
    Executing,
    /// Forward action succeeded
    Committed,
    /// Compensation ran successfully
    Compensated,
    /// Compensation failed; needs manual remediation
    CompensationFailed,
}

impl OperationStatus {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Compensated | OperationStatus::CompensationFailed
        )
    }

    /// Whether rollback still has to run this operation's compensation
    pub fn needs_compensation(&self) -> bool {
        matches!(
            self,
            OperationStatus::Planned | OperationStatus::Executing | OperationStatus::Committed
        )
    }

    /// Valid forward transitions
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Planned, Executing)
                | (Executing, Committed)
                | (Planned, Compensated)
                | (Planned, CompensationFailed)
                | (Executing, Compensated)
                | (Executing, CompensationFailed)
                | (Committed, Compensated)
                | (Committed, CompensationFailed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Planned => "planned",
            OperationStatus::Executing => "executing",
            OperationStatus::Committed => "committed",
            OperationStatus::Compensated => "compensated",
            OperationStatus::CompensationFailed => "compensation_failed",
        };
        f.write_str(s)
    }
}

/// How to semantically undo an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Compensation {
    /// Delete whatever the registry holds for `key`, if it was ever created
    DeleteResource {
        key: ResourceKey,
        /// Workspace an item lives in
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<ResourceKey>,
    },

    /// Revoke a role assignment tracked under `assignment`
    RemoveRoleAssignment {
        workspace: ResourceKey,
        assignment: ResourceKey,
        principal_id: String,
    },

    /// Put back the properties observed before an update
    RestoreProperties {
        key: ResourceKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<ResourceKey>,
        display_name: String,
        description: Option<String>,
    },

    /// Irreversible operation (e.g. explicit teardown)
    None,
}

impl Compensation {
    /// Delete a top-level resource
    pub fn delete(key: ResourceKey) -> Self {
        Compensation::DeleteResource { key, parent: None }
    }

    /// Delete an item nested in `parent`
    pub fn delete_item(key: ResourceKey, parent: ResourceKey) -> Self {
        Compensation::DeleteResource {
            key,
            parent: Some(parent),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Compensation::DeleteResource { key, .. } => format!("delete {}", key),
            Compensation::RemoveRoleAssignment {
                workspace,
                principal_id,
                ..
            } => format!("revoke {} on {}", principal_id, workspace),
            Compensation::RestoreProperties { key, .. } => format!("restore {}", key),
            Compensation::None => "none".to_string(),
        }
    }
}
