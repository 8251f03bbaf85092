//! `stagecraft rollback` and `stagecraft recover`

use stagecraft_promotion::PromotionOrchestrator;
use stagecraft_saga::RollbackReport;
use stagecraft_types::outcome::{EXIT_COMPLETED, EXIT_PARTIALLY_FAILED};
use stagecraft_types::{RunId, RunStatus};

use crate::error::{CliError, CliResult};
use crate::output::{self, print_error, print_info, print_success, OutputFormat};

/// Undo every stage of a run, committed ones included
pub async fn execute(
    run_id: &str,
    orchestrator: &PromotionOrchestrator,
    format: OutputFormat,
) -> CliResult<i32> {
    let run_id = RunId::parse(run_id)
        .ok_or_else(|| CliError::InvalidInput(format!("not a run id: {run_id}")))?;

    let report = orchestrator.rollback_run(run_id).await?;

    if format.is_text() {
        for txn in &report.transactions {
            print_transaction(txn);
        }
        for failure in &report.failures {
            print_error(&failure.to_string());
        }
        let summary = format!(
            "Run {} {}, {} lineage entries removed",
            report.run_id, report.status, report.lineage_removed
        );
        if report.status == RunStatus::RolledBack {
            print_success(&summary);
        } else {
            print_error(&summary);
        }
    } else {
        output::print_single(&report, format)?;
    }
    Ok(report.exit_code())
}

/// Roll back transactions a crashed process left open
pub async fn recover(orchestrator: &PromotionOrchestrator, format: OutputFormat) -> CliResult<i32> {
    let reports = orchestrator.recover().await?;
    let clean = reports.iter().all(RollbackReport::is_clean);

    if format.is_text() {
        if reports.is_empty() {
            print_info("No interrupted transactions");
        }
        for txn in &reports {
            print_transaction(txn);
        }
    } else {
        output::print_single(&reports, format)?;
    }

    Ok(if clean { EXIT_COMPLETED } else { EXIT_PARTIALLY_FAILED })
}

fn print_transaction(txn: &RollbackReport) {
    let stage = txn
        .stage
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} [{}] {:?}: {} compensated, {} failed",
        txn.transaction_id,
        stage,
        txn.status,
        txn.compensated.len(),
        txn.failed.len()
    );
}
