//! Declarative resource descriptors
//!
//! Descriptors arrive from the configuration loader already syntax-checked.
//! They describe each artifact once, with optional per-stage overrides, and
//! are resolved into a concrete [`ResourceSpec`] for a given stage.

use crate::capacity::CapacityTier;
use crate::principal::RoleAssignment;
use crate::resource::{ResourceKey, ResourceKind};
use crate::stage::{ArtifactVersion, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-stage adjustments to a descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOverride {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub capacity_tier: Option<CapacityTier>,
    /// Merged over the descriptor's base properties
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Replaces the descriptor's role list for this stage
    pub roles: Option<Vec<RoleAssignment>>,
    /// Do not provision this resource at this stage
    pub skip: bool,
}

/// One artifact of a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub logical_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Logical name of the parent workspace (items only)
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub capacity_tier: CapacityTier,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Role assignments applied to a workspace after it is ensured
    #[serde(default)]
    pub roles: Vec<RoleAssignment>,
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageOverride>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, logical_name: impl Into<String>) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            display_name: None,
            description: None,
            workspace: None,
            capacity_tier: CapacityTier::default(),
            properties: serde_json::Map::new(),
            roles: Vec::new(),
            stages: BTreeMap::new(),
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_tier(mut self, tier: CapacityTier) -> Self {
        self.capacity_tier = tier;
        self
    }

    pub fn with_role(mut self, assignment: RoleAssignment) -> Self {
        self.roles.push(assignment);
        self
    }

    pub fn with_override(mut self, stage: Stage, ov: StageOverride) -> Self {
        self.stages.insert(stage, ov);
        self
    }

    /// Registry key of this descriptor at `stage`
    pub fn key_for(&self, stage: &Stage) -> ResourceKey {
        ResourceKey::new(self.logical_name.clone(), stage.environment(), self.kind)
    }

    /// Roles to apply at `stage`
    pub fn roles_for(&self, stage: &Stage) -> &[RoleAssignment] {
        match self.stages.get(stage).and_then(|o| o.roles.as_ref()) {
            Some(roles) => roles,
            None => &self.roles,
        }
    }

    /// Resolve into a concrete spec, or `None` if the stage skips this resource
    pub fn resolve(&self, stage: &Stage) -> Option<ResourceSpec> {
        let ov = self.stages.get(stage).cloned().unwrap_or_default();
        if ov.skip {
            return None;
        }

        let mut properties = self.properties.clone();
        properties.extend(ov.properties);

        let display_name = ov
            .display_name
            .or_else(|| self.display_name.clone())
            .unwrap_or_else(|| format!("{}-{}", self.logical_name, stage));

        Some(ResourceSpec {
            display_name,
            description: ov.description.or_else(|| self.description.clone()),
            capacity_tier: ov.capacity_tier.unwrap_or(self.capacity_tier),
            parent: self
                .workspace
                .as_ref()
                .map(|ws| ResourceKey::workspace(ws.clone(), stage.environment())),
            properties,
        })
    }
}

/// Concrete, stage-resolved request to provision one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub display_name: String,
    pub description: Option<String>,
    pub capacity_tier: CapacityTier,
    /// Workspace the item is created in
    pub parent: Option<ResourceKey>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ResourceSpec {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            description: None,
            capacity_tier: CapacityTier::default(),
            parent: None,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_parent(mut self, parent: ResourceKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_tier(mut self, tier: CapacityTier) -> Self {
        self.capacity_tier = tier;
        self
    }
}

/// A versioned set of artifacts promoted together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub version: ArtifactVersion,
    pub resources: Vec<ResourceDescriptor>,
}

impl ArtifactBundle {
    pub fn new(version: ArtifactVersion) -> Self {
        Self {
            version,
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, descriptor: ResourceDescriptor) -> Self {
        self.resources.push(descriptor);
        self
    }

    /// Descriptors in provisioning order: workspaces first, then items.
    /// Declaration order is kept within each group.
    pub fn provisioning_order(&self) -> Vec<&ResourceDescriptor> {
        let mut ordered: Vec<&ResourceDescriptor> = self.resources.iter().collect();
        ordered.sort_by_key(|d| d.kind.provisioning_rank());
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_applies_stage_override() {
        let mut ov = StageOverride {
            capacity_tier: Some(CapacityTier::Premium),
            ..Default::default()
        };
        ov.properties.insert("retention".into(), serde_json::json!(30));

        let desc = ResourceDescriptor::new(ResourceKind::Lakehouse, "sales")
            .in_workspace("alpha")
            .with_override(Stage::new("prod"), ov);

        let dev = desc.resolve(&Stage::new("dev")).unwrap();
        assert_eq!(dev.display_name, "sales-dev");
        assert_eq!(dev.capacity_tier, CapacityTier::Fabric);
        assert_eq!(dev.parent.unwrap().to_string(), "workspace:dev:alpha");

        let prod = desc.resolve(&Stage::new("prod")).unwrap();
        assert_eq!(prod.capacity_tier, CapacityTier::Premium);
        assert_eq!(prod.properties["retention"], 30);
    }

    #[test]
    fn test_skip_override_drops_resource() {
        let desc = ResourceDescriptor::new(ResourceKind::Notebook, "scratch").with_override(
            Stage::new("prod"),
            StageOverride {
                skip: true,
                ..Default::default()
            },
        );
        assert!(desc.resolve(&Stage::new("prod")).is_none());
        assert!(desc.resolve(&Stage::new("test")).is_some());
    }

    #[test]
    fn test_bundle_orders_workspaces_first() {
        let bundle = ArtifactBundle::new("1.0.0".parse().unwrap())
            .with_resource(ResourceDescriptor::new(ResourceKind::Lakehouse, "lh").in_workspace("ws"))
            .with_resource(ResourceDescriptor::new(ResourceKind::Workspace, "ws"));
        let order: Vec<_> = bundle.provisioning_order().iter().map(|d| d.kind).collect();
        assert_eq!(order, vec![ResourceKind::Workspace, ResourceKind::Lakehouse]);
    }

    #[test]
    fn test_bundle_parses_from_yaml() {
        let yaml = r#"
version: 1.4.0
resources:
  - kind: workspace
    logical_name: alpha
    roles:
      - principal: { id: "grp-1", kind: group }
        role: contributor
  - kind: warehouse
    logical_name: wh
    workspace: alpha
    stages:
      prod:
        capacity_tier: premium
"#;
        let bundle: ArtifactBundle = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(bundle.resources.len(), 2);
        assert_eq!(bundle.resources[0].roles.len(), 1);
        assert!(bundle.resources[1].stages.contains_key(&Stage::new("prod")));
    }
}
