//! `stagecraft lineage <version>`

use serde::Serialize;
use stagecraft_promotion::PromotionOrchestrator;
use stagecraft_types::outcome::EXIT_COMPLETED;
use stagecraft_types::{ArtifactVersion, StageLineage};
use tabled::Tabled;

use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct LineageRow {
    stage: String,
    source: String,
    promoted_at: String,
    run_id: String,
}

impl From<StageLineage> for LineageRow {
    fn from(entry: StageLineage) -> Self {
        Self {
            stage: entry.stage.to_string(),
            source: entry
                .source_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            promoted_at: entry.promoted_at.to_rfc3339(),
            run_id: entry.run_id.to_string(),
        }
    }
}

pub async fn execute(
    version: &str,
    orchestrator: &PromotionOrchestrator,
    format: OutputFormat,
) -> CliResult<i32> {
    let version: ArtifactVersion = version
        .parse()
        .map_err(|e| CliError::InvalidInput(format!("bad version {version}: {e}")))?;

    let history = orchestrator.lineage(&version).await?;
    let rows: Vec<LineageRow> = history.into_iter().map(LineageRow::from).collect();
    output::print_rows(rows, format)?;
    Ok(EXIT_COMPLETED)
}
