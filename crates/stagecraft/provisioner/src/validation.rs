//! Pre-flight checks run before any registry reservation or remote call

use stagecraft_types::{ResourceKey, ResourceKind, ResourceSpec};

use crate::error::{ProvisionError, Result};

pub const MAX_NAME_LEN: usize = 256;

const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Device names the platform refuses regardless of case
const RESERVED_NAMES: &[&str] = &[
    ".", "..", "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6",
    "COM7", "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8",
    "LPT9",
];

/// Check a display or logical name against the platform naming rules.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(ProvisionError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.chars().count() > MAX_NAME_LEN {
        return invalid("name exceeds 256 characters");
    }
    if name.trim() != name {
        return invalid("leading or trailing whitespace");
    }
    if let Some(c) = name
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
    {
        return invalid(&format!("forbidden character {c:?}"));
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return invalid("reserved name");
    }
    Ok(())
}

/// Validate a create/update request for `key`.
///
/// Items must name a parent workspace; the kind must be supported on the
/// requested capacity tier.
pub fn validate_spec(key: &ResourceKey, spec: &ResourceSpec) -> Result<()> {
    validate_name(&key.logical_name)?;
    validate_name(&spec.display_name)?;

    if key.kind == ResourceKind::RoleAssignment {
        return Err(ProvisionError::InvalidSpec {
            key: key.clone(),
            reason: "role assignments are applied with assign_role".into(),
        });
    }

    match (&spec.parent, key.kind.is_item()) {
        (None, true) => {
            return Err(ProvisionError::InvalidSpec {
                key: key.clone(),
                reason: "item has no parent workspace".into(),
            })
        }
        (Some(parent), false) => {
            return Err(ProvisionError::InvalidSpec {
                key: key.clone(),
                reason: format!("workspace cannot be nested in {parent}"),
            })
        }
        (Some(parent), true) if parent.kind != ResourceKind::Workspace => {
            return Err(ProvisionError::InvalidSpec {
                key: key.clone(),
                reason: format!("parent {parent} is not a workspace"),
            })
        }
        _ => {}
    }

    if !spec.capacity_tier.supports(key.kind) {
        return Err(ProvisionError::UnsupportedOnTier {
            kind: key.kind,
            tier: spec.capacity_tier,
        });
    }
    Ok(())
}
