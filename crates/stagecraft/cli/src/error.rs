//! CLI error types

use std::path::PathBuf;

use stagecraft_types::outcome::{EXIT_ERROR, EXIT_VALIDATION};
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Bundle file could not be parsed
    #[error("Invalid bundle {path}: {reason}")]
    Bundle { path: PathBuf, reason: String },

    /// Invalid command-line input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Promotion(#[from] stagecraft_promotion::PromotionError),

    #[error(transparent)]
    Gateway(#[from] stagecraft_gateway::GatewayError),

    #[error(transparent)]
    Registry(#[from] stagecraft_registry::RegistryError),

    #[error(transparent)]
    Saga(#[from] stagecraft_saga::SagaError),

    #[error(transparent)]
    Audit(#[from] stagecraft_audit::AuditError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Bundle { .. } | CliError::InvalidInput(_) => {
                EXIT_VALIDATION
            }
            CliError::Promotion(e) => e.exit_code(),
            _ => EXIT_ERROR,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_promotion::PromotionError;
    use stagecraft_types::Stage;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidInput("bad run id".into()).exit_code(),
            EXIT_VALIDATION
        );
        assert_eq!(
            CliError::Promotion(PromotionError::UnknownStage(Stage::new("qa"))).exit_code(),
            EXIT_VALIDATION
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(CliError::Io(io).exit_code(), EXIT_ERROR);
    }
}
