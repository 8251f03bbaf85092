//! Stagecraft Promotion - Orchestrates artifact promotion across stages
//!
//! A run advances one artifact version through a contiguous slice of the
//! configured stage sequence (by default `dev -> test -> prod`):
//!
//! 1. validate up front: stage ordering, lineage (the predecessor stage must
//!    hold lineage for the version), descriptor naming and capacity tiers
//! 2. for each stage, open a transaction and ensure every resource, with
//!    workspaces before their items and role assignments after their workspace
//! 3. commit the stage and append lineage, or roll back that stage only
//!
//! Validation failures are returned as [`PromotionError`] and issue no remote
//! calls. Once a run is in progress its outcome is reported as a
//! [`PromotionReport`] with a terminal [`RunStatus`](stagecraft_types::RunStatus).

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod request;

pub use config::PromotionConfig;
pub use error::{PromotionError, Result};
pub use orchestrator::PromotionOrchestrator;
pub use report::{
    PlannedStep, PromotionPlan, PromotionReport, ResourceOutcome, RunRollbackReport, StageOutcome,
    StagePlan, StageReport,
};
pub use request::PromotionRequest;
