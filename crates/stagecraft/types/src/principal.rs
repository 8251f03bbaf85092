//! Principals and workspace role assignments

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of identity a role is granted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Group,
    ServicePrincipal,
}

impl PrincipalKind {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "User",
            PrincipalKind::Group => "Group",
            PrincipalKind::ServicePrincipal => "ServicePrincipal",
        }
    }
}

/// Identity known to the tenant directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub kind: PrincipalKind,
}

/// Workspace roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceRole {
    Admin,
    Member,
    Contributor,
    Viewer,
}

impl WorkspaceRole {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Admin => "Admin",
            WorkspaceRole::Member => "Member",
            WorkspaceRole::Contributor => "Contributor",
            WorkspaceRole::Viewer => "Viewer",
        }
    }
}

impl fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// A role granted to a principal on a workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub principal: Principal,
    pub role: WorkspaceRole,
}

impl RoleAssignment {
    /// Logical name used for the assignment's registry key
    pub fn logical_name(&self, workspace: &str) -> String {
        format!("{}/{}", workspace, self.principal.id)
    }
}
