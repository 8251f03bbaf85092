//! Promotion error types

use stagecraft_provisioner::ProvisionError;
use stagecraft_registry::RegistryError;
use stagecraft_saga::SagaError;
use stagecraft_types::outcome::{EXIT_ERROR, EXIT_VALIDATION};
use stagecraft_types::{ArtifactVersion, ErrorKind, ResourceKey, RunId, Stage};
use thiserror::Error;

/// Errors returned before a run starts, or by run-level operations.
///
/// Failures during execution are not errors: they end up in the run's
/// [`PromotionReport`](crate::PromotionReport).
#[derive(Debug, Error)]
pub enum PromotionError {
    /// Target stage's predecessor has no lineage for this version
    #[error("cannot promote {version} to {stage}: not yet promoted to {required}")]
    StageLineageViolation {
        version: ArtifactVersion,
        stage: Stage,
        required: Stage,
    },

    #[error("stage {0} is not in the configured sequence")]
    UnknownStage(Stage),

    #[error("requested stages must be a contiguous, ordered run of the sequence: {0:?}")]
    NonContiguousStages(Vec<Stage>),

    #[error("promotion request names no stages")]
    NoStages,

    #[error("bundle {0} has no resources")]
    EmptyBundle(ArtifactVersion),

    /// Descriptor failed naming, tier or parent checks at a stage
    #[error("invalid descriptor for {key} at {stage}: {source}")]
    InvalidDescriptor {
        stage: Stage,
        key: ResourceKey,
        #[source]
        source: ProvisionError,
    },

    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("transaction manager error: {0}")]
    Saga(#[from] SagaError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl PromotionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PromotionError::StageLineageViolation { .. } => ErrorKind::StageLineageViolation,
            PromotionError::UnknownStage(_)
            | PromotionError::NonContiguousStages(_)
            | PromotionError::NoStages
            | PromotionError::EmptyBundle(_)
            | PromotionError::Configuration(_) => ErrorKind::Validation,
            PromotionError::InvalidDescriptor { source, .. } => source.kind(),
            PromotionError::UnknownRun(_) => ErrorKind::Internal,
            PromotionError::Saga(e) => e.kind(),
            PromotionError::Registry(_) => ErrorKind::Storage,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.kind().is_validation() {
            EXIT_VALIDATION
        } else {
            EXIT_ERROR
        }
    }
}

pub type Result<T> = std::result::Result<T, PromotionError>;
