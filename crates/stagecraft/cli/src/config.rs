//! Configuration for the stagecraft binary

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stagecraft_gateway::GatewayConfig;
use stagecraft_promotion::PromotionConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagecraftConfig {
    /// Where the control plane lives and how to authenticate
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Retry and circuit breaker tuning
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Stage sequence and run timeout
    #[serde(default)]
    pub promotion: PromotionConfig,

    /// Local state files
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL every API path is appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
        }
    }
}

/// Registry, lineage, journal and audit log all live under `data_dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn lineage_path(&self) -> PathBuf {
        self.data_dir.join("lineage.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON formatted log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_token_env() -> String {
    "STAGECRAFT_TOKEN".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".stagecraft")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl StagecraftConfig {
    /// Layer defaults, then the optional file, then `STAGECRAFT__*` variables
    /// (e.g. `STAGECRAFT__GATEWAY__RETRY__MAX_ATTEMPTS=5`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&StagecraftConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("STAGECRAFT")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_types::Stage;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StagecraftConfig::default();
        assert_eq!(config.gateway.retry.max_retries, 3);
        assert_eq!(config.gateway.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.promotion.stages.first(), &Stage::new("dev"));
        assert_eq!(
            config.storage.journal_path(),
            PathBuf::from(".stagecraft/journal.jsonl")
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "control_plane:\n  base_url: https://cp.example.com/v1\n\
             gateway:\n  circuit_breaker:\n    cool_down_secs: 5\n\
             promotion:\n  stages: [dev, uat, prod]"
        )
        .unwrap();

        let config = StagecraftConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.control_plane.base_url, "https://cp.example.com/v1");
        assert_eq!(config.gateway.circuit_breaker.cool_down_secs, 5);
        assert_eq!(config.gateway.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.promotion.stages.stages()[1], Stage::new("uat"));
        assert_eq!(config.control_plane.token_env, "STAGECRAFT_TOKEN");
    }
}
