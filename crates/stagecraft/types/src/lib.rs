//! Stagecraft Types - Core types for workspace provisioning and promotion
//!
//! Stagecraft automates the lifecycle of tenant-scoped workspaces (and the
//! data/compute items nested inside them) and promotes versioned artifact
//! bundles through an ordered sequence of deployment stages.
//!
//! ## Architectural Boundaries
//!
//! - **stagecraft-gateway** owns: every remote call, retry/backoff, circuit breaking
//! - **stagecraft-registry** owns: the idempotency ledger and stage lineage
//! - **stagecraft-provisioner** owns: create-or-get of workspaces and items
//! - **stagecraft-saga** owns: write-ahead compensation records and rollback
//! - **stagecraft-promotion** owns: the per-run state machine across stages
//!
//! ## Key Concepts
//!
//! - **ResourceKey**: deterministic identity of a remote resource
//! - **ResourceRecord**: what the registry knows about a key
//! - **Stage / StageLineage**: ordered environments and the promotion chain
//! - **Compensation**: serializable description of how to undo an operation
//! - **RunStatus**: terminal outcome of a promotion run, with exit codes
//!
//! The two seams between provisioning and the transaction manager live here
//! ([`OperationLog`] and [`CompensationExecutor`]) so neither crate depends
//! on the other.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod capacity;
pub mod descriptor;
pub mod ids;
pub mod operation;
pub mod outcome;
pub mod principal;
pub mod resource;
pub mod stage;
pub mod traits;

// Re-export main types
pub use capacity::CapacityTier;
pub use descriptor::{ArtifactBundle, ResourceDescriptor, ResourceSpec, StageOverride};
pub use ids::{OperationId, RemoteId, RunId, TransactionId};
pub use operation::{Compensation, OperationKind, OperationStatus};
pub use outcome::{ErrorKind, OperationFailure, RunStatus};
pub use principal::{Principal, PrincipalKind, RoleAssignment, WorkspaceRole};
pub use resource::{Environment, ResourceKey, ResourceKind, ResourceRecord, ResourceState};
pub use stage::{ArtifactVersion, Stage, StageLineage, StageSequence};
pub use traits::{CompensationExecutor, OperationLog};
