//! `stagecraft promote`

use colored::*;
use stagecraft_promotion::{PromotionOrchestrator, PromotionReport, StageOutcome};
use stagecraft_types::RunStatus;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::TargetArgs;
use crate::error::CliResult;
use crate::output::{self, print_error, print_info, print_success, print_warning, OutputFormat};

pub async fn execute(
    args: TargetArgs,
    orchestrator: &PromotionOrchestrator,
    format: OutputFormat,
) -> CliResult<i32> {
    let request = args.request(orchestrator).await?;
    if format.is_text() {
        let stages: Vec<String> = request.stages.iter().map(|s| s.to_string()).collect();
        print_info(&format!(
            "Promoting {} through {}",
            request.artifact.version,
            stages.join(" -> ")
        ));
    }

    // Ctrl-C stops the run at the next operation boundary and rolls back
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let result = orchestrator.promote_with_cancel(request, token).await;
    watcher.abort();
    let report = result?;

    if format.is_text() {
        print_report(&report);
    } else {
        output::print_single(&report, format)?;
    }
    Ok(report.exit_code())
}

fn print_report(report: &PromotionReport) {
    for stage in &report.stages {
        let outcome = match stage.outcome {
            StageOutcome::Committed => stage.outcome.as_str().green(),
            StageOutcome::RolledBack => stage.outcome.as_str().yellow(),
            StageOutcome::PartiallyRolledBack => stage.outcome.as_str().red(),
        };
        println!(
            "  {:<8} {} ({} created, {} existing)",
            stage.stage.to_string(),
            outcome,
            stage.created_count(),
            stage.resources.len() - stage.created_count()
        );
    }
    for failure in &report.failures {
        let target = failure
            .target
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_default();
        println!("    {} {} {} {}", "-".dimmed(), failure.kind, target, failure.message);
    }

    let summary = format!("Run {} {}", report.run_id, report.status);
    match report.status {
        RunStatus::Completed => print_success(&summary),
        RunStatus::RolledBack => print_warning(&summary),
        _ => print_error(&summary),
    }
}
