//! Subcommand implementations. Each returns the process exit code.

pub mod audit;
pub mod lineage;
pub mod plan;
pub mod promote;
pub mod rollback;

use std::path::PathBuf;

use clap::Args;
use stagecraft_promotion::{PromotionOrchestrator, PromotionRequest};
use stagecraft_types::Stage;

use crate::engine::load_bundle;
use crate::error::{CliError, CliResult};

/// Which bundle to promote and how far
#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Artifact bundle (YAML, or JSON with a .json extension)
    #[arg(short, long)]
    pub bundle: PathBuf,

    /// Explicit, contiguous stages to promote through (e.g. `test,prod`)
    #[arg(long, value_delimiter = ',', conflicts_with = "to")]
    pub stages: Vec<String>,

    /// Promote from the next unreached stage up to this one
    #[arg(long)]
    pub to: Option<String>,
}

impl TargetArgs {
    pub async fn request(&self, orchestrator: &PromotionOrchestrator) -> CliResult<PromotionRequest> {
        let bundle = load_bundle(&self.bundle).await?;

        if let Some(target) = &self.to {
            let request = PromotionRequest::to_stage(
                bundle,
                &Stage::new(target.as_str()),
                &orchestrator.config().stages,
                orchestrator.lineage_store().as_ref(),
            )
            .await?;
            return Ok(request);
        }
        if self.stages.is_empty() {
            return Err(CliError::InvalidInput(
                "either --stages or --to is required".into(),
            ));
        }

        let stages = self.stages.iter().map(|s| Stage::new(s.trim())).collect();
        Ok(PromotionRequest::new(bundle, stages))
    }
}
