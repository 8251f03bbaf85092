//! Resource identity and registry records

use crate::ids::RemoteId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of remote resources Stagecraft provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Workspace,
    Lakehouse,
    Warehouse,
    Notebook,
    Pipeline,
    SemanticModel,
    Report,
    Eventhouse,
    Environment,
    /// A principal's role on a workspace. Tracked in the registry so
    /// assignments are idempotent like any other resource.
    RoleAssignment,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Workspace,
        ResourceKind::Lakehouse,
        ResourceKind::Warehouse,
        ResourceKind::Notebook,
        ResourceKind::Pipeline,
        ResourceKind::SemanticModel,
        ResourceKind::Report,
        ResourceKind::Eventhouse,
        ResourceKind::Environment,
        ResourceKind::RoleAssignment,
    ];

    /// Stable lowercase name, also used in endpoint classes and keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Workspace => "workspace",
            ResourceKind::Lakehouse => "lakehouse",
            ResourceKind::Warehouse => "warehouse",
            ResourceKind::Notebook => "notebook",
            ResourceKind::Pipeline => "pipeline",
            ResourceKind::SemanticModel => "semantic_model",
            ResourceKind::Report => "report",
            ResourceKind::Eventhouse => "eventhouse",
            ResourceKind::Environment => "environment",
            ResourceKind::RoleAssignment => "role_assignment",
        }
    }

    /// Items live inside a workspace
    pub fn is_item(&self) -> bool {
        !matches!(self, ResourceKind::Workspace | ResourceKind::RoleAssignment)
    }

    /// Provisioning order within a stage: workspaces, then items, then roles
    pub fn provisioning_rank(&self) -> u8 {
        match self {
            ResourceKind::Workspace => 0,
            ResourceKind::RoleAssignment => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

/// Deployment environment a resource belongs to (usually the stage name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        Environment::new(s)
    }
}

impl From<Environment> for String {
    fn from(env: Environment) -> Self {
        env.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identity of a remote resource.
///
/// Identical keys resolve to the same remote identifier once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub logical_name: String,
    pub environment: Environment,
    pub kind: ResourceKind,
}

impl ResourceKey {
    pub fn new(logical_name: impl Into<String>, environment: Environment, kind: ResourceKind) -> Self {
        Self {
            logical_name: logical_name.into(),
            environment,
            kind,
        }
    }

    pub fn workspace(logical_name: impl Into<String>, environment: Environment) -> Self {
        Self::new(logical_name, environment, ResourceKind::Workspace)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.environment, self.logical_name)
    }
}

/// Lifecycle state of a registry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
    /// Reserved by a caller that is about to create the resource
    Pending,
    /// Exists remotely under `remote_id`
    Created,
    /// Last creation attempt failed; eligible for retry
    Failed { reason: String },
    /// Removed by teardown or compensation
    Deleted,
}

impl ResourceState {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceState::Pending => "pending",
            ResourceState::Created => "created",
            ResourceState::Failed { .. } => "failed",
            ResourceState::Deleted => "deleted",
        }
    }
}

/// What the registry knows about one resource key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    pub remote_id: Option<RemoteId>,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Fresh reservation for a key
    pub fn pending(key: ResourceKey) -> Self {
        let now = Utc::now();
        Self {
            kind: key.kind,
            key,
            remote_id: None,
            state: ResourceState::Pending,
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self.state, ResourceState::Created)
    }

    /// Remote id, only while the resource is known to exist
    pub fn live_remote_id(&self) -> Option<&RemoteId> {
        if self.is_created() {
            self.remote_id.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_is_deterministic() {
        let a = ResourceKey::workspace("alpha", Environment::new("Dev"));
        let b = ResourceKey::workspace("alpha", Environment::new("dev"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "workspace:dev:alpha");
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("spreadsheet".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_pending_record_has_no_live_remote_id() {
        let mut record = ResourceRecord::pending(ResourceKey::workspace("alpha", Environment::new("dev")));
        record.remote_id = Some(RemoteId::new("ws-1"));
        assert!(record.live_remote_id().is_none());
        record.state = ResourceState::Created;
        assert_eq!(record.live_remote_id().map(|r| r.as_str()), Some("ws-1"));
    }
}
