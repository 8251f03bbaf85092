//! Provisioning errors

use stagecraft_gateway::GatewayError;
use stagecraft_registry::RegistryError;
use stagecraft_types::{CapacityTier, ErrorKind, OperationFailure, ResourceKey, ResourceKind};
use thiserror::Error;

/// Remote error codes that mean "not available on this capacity"
pub const CAPACITY_ERROR_CODES: &[&str] = &[
    "FeatureNotAvailable",
    "UnsupportedCapacitySKU",
    "CapacityNotSupported",
];

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid request for {key}: {reason}")]
    InvalidSpec { key: ResourceKey, reason: String },

    /// Kind cannot exist on the tier. Raised before any remote call, or
    /// mapped from a capacity error code returned by the remote.
    #[error("{kind} is not supported on {tier} capacity")]
    UnsupportedOnTier { kind: ResourceKind, tier: CapacityTier },

    #[error("{key} requires workspace {parent} to be provisioned first")]
    MissingParent { key: ResourceKey, parent: ResourceKey },

    #[error("{0} is not provisioned")]
    NotProvisioned(ResourceKey),

    #[error("remote call for {key} failed: {source}")]
    Remote {
        key: ResourceKey,
        #[source]
        source: GatewayError,
    },

    #[error("remote response for {key} is malformed: {detail}")]
    MalformedResponse { key: ResourceKey, detail: String },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The operation log refused the operation (cancelled, journal failure)
    #[error("operation log: {0}")]
    OperationLog(OperationFailure),
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::InvalidName { .. }
            | ProvisionError::InvalidSpec { .. }
            | ProvisionError::MissingParent { .. } => ErrorKind::Validation,
            ProvisionError::UnsupportedOnTier { .. } => ErrorKind::UnsupportedOnTier,
            ProvisionError::NotProvisioned(_) | ProvisionError::MalformedResponse { .. } => {
                ErrorKind::NonTransientRemote
            }
            ProvisionError::Remote { source, .. } => source.kind(),
            ProvisionError::Registry(_) => ErrorKind::Storage,
            ProvisionError::OperationLog(failure) => failure.kind,
        }
    }

    /// Caught before anything was reserved or sent
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidName { .. }
                | ProvisionError::InvalidSpec { .. }
                | ProvisionError::UnsupportedOnTier { .. }
                | ProvisionError::MissingParent { .. }
        )
    }

    /// Lift a gateway error, surfacing capacity rejections as `UnsupportedOnTier`.
    pub(crate) fn remote(key: &ResourceKey, tier: CapacityTier, source: GatewayError) -> Self {
        match source.error_code() {
            Some(code) if CAPACITY_ERROR_CODES.contains(&code) => {
                ProvisionError::UnsupportedOnTier {
                    kind: key.kind,
                    tier,
                }
            }
            _ => ProvisionError::Remote {
                key: key.clone(),
                source,
            },
        }
    }

    /// Flatten into the per-operation failure reported in run results.
    pub fn to_failure(&self, target: &ResourceKey) -> OperationFailure {
        match self {
            ProvisionError::OperationLog(failure) => {
                let mut failure = failure.clone();
                failure.target.get_or_insert_with(|| target.clone());
                failure
            }
            other => OperationFailure::new(other.kind(), other.to_string()).with_target(target.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
