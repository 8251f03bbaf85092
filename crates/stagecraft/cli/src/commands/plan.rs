//! `stagecraft plan`: what a promotion would do, without calling out

use colored::*;
use stagecraft_promotion::{PromotionOrchestrator, PromotionPlan};
use stagecraft_provisioner::PlannedAction;
use stagecraft_types::outcome::EXIT_COMPLETED;

use super::TargetArgs;
use crate::error::CliResult;
use crate::output::{self, print_info, OutputFormat};

pub async fn execute(
    args: TargetArgs,
    orchestrator: &PromotionOrchestrator,
    format: OutputFormat,
) -> CliResult<i32> {
    let request = args.request(orchestrator).await?;
    let plan = orchestrator.plan(&request).await?;

    if format.is_text() {
        print_plan(&plan);
    } else {
        output::print_single(&plan, format)?;
    }
    Ok(EXIT_COMPLETED)
}

fn print_plan(plan: &PromotionPlan) {
    for stage in &plan.stages {
        println!("{}", stage.stage.to_string().bold());
        for step in &stage.steps {
            match &step.action {
                PlannedAction::Create => println!("  {} {}", "+".green(), step.key),
                PlannedAction::Exists { remote_id } => {
                    println!("  {} {} ({})", "=".dimmed(), step.key, remote_id)
                }
            }
        }
    }
    print_info(&format!(
        "{} to create for {}",
        plan.creations(),
        plan.artifact_version
    ));
}
