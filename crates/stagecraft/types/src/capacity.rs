//! Capacity tiers and the item kinds each one supports

use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capacity tier a workspace is hosted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapacityTier {
    /// Shared (per-user licensed) capacity: reporting items only
    Shared,
    /// Time-limited trial capacity
    Trial,
    /// Dedicated capacity
    #[default]
    Fabric,
    /// Legacy premium capacity
    Premium,
}

impl CapacityTier {
    /// Whether `kind` can be created on this tier
    pub fn supports(&self, kind: ResourceKind) -> bool {
        match self {
            CapacityTier::Shared => matches!(
                kind,
                ResourceKind::Workspace
                    | ResourceKind::SemanticModel
                    | ResourceKind::Report
                    | ResourceKind::RoleAssignment
            ),
            CapacityTier::Trial | CapacityTier::Fabric | CapacityTier::Premium => true,
        }
    }
}

impl fmt::Display for CapacityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityTier::Shared => write!(f, "shared"),
            CapacityTier::Trial => write!(f, "trial"),
            CapacityTier::Fabric => write!(f, "fabric"),
            CapacityTier::Premium => write!(f, "premium"),
        }
    }
}
