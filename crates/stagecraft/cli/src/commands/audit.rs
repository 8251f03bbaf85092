//! `stagecraft audit verify`

use std::path::{Path, PathBuf};

use clap::Subcommand;
use stagecraft_audit::{ChainVerification, FileAuditSink, IntegrityVerifier};
use stagecraft_types::outcome::{EXIT_COMPLETED, EXIT_ERROR};

use crate::error::CliResult;
use crate::output::{self, print_error, print_success, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum AuditCommands {
    /// Check the hash chain of an audit log
    Verify {
        /// Log to check; defaults to the configured audit log
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

pub async fn execute(
    command: AuditCommands,
    default_path: &Path,
    format: OutputFormat,
) -> CliResult<i32> {
    match command {
        AuditCommands::Verify { path } => {
            let path = path.as_deref().unwrap_or(default_path);
            let verification = verify(path).await?;

            if format.is_text() {
                if verification.valid {
                    print_success(&format!(
                        "{} entries verified in {}",
                        verification.verified_entries,
                        path.display()
                    ));
                } else {
                    print_error(&format!(
                        "Chain broken at entry {}: {}",
                        verification
                            .first_invalid_index
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        verification.error_message.as_deref().unwrap_or("unknown")
                    ));
                }
            } else {
                output::print_single(&verification, format)?;
            }

            Ok(if verification.valid { EXIT_COMPLETED } else { EXIT_ERROR })
        }
    }
}

async fn verify(path: &Path) -> CliResult<ChainVerification> {
    let events = FileAuditSink::read_file(path).await?;
    Ok(IntegrityVerifier::verify_chain(&events))
}
