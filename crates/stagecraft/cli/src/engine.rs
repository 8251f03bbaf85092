//! Wires the file-backed stores and the HTTP gateway into an orchestrator

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stagecraft_audit::{AuditSink, CompositeSink, FileAuditSink, TracingAuditSink};
use stagecraft_gateway::{EnvTokenProvider, HttpTransport, ResilientGateway, TokioClock};
use stagecraft_promotion::PromotionOrchestrator;
use stagecraft_provisioner::Provisioner;
use stagecraft_registry::{FileLineageStore, FileResourceStore, ResourceRegistry};
use stagecraft_saga::{FileJournal, TransactionManager};
use stagecraft_types::ArtifactBundle;
use tracing::debug;

use crate::config::StagecraftConfig;
use crate::error::{CliError, CliResult};

pub struct Engine {
    pub orchestrator: PromotionOrchestrator,
    pub audit_path: PathBuf,
}

impl Engine {
    pub async fn open(config: &StagecraftConfig) -> CliResult<Self> {
        let storage = &config.storage;
        tokio::fs::create_dir_all(&storage.data_dir).await?;
        debug!(data_dir = %storage.data_dir.display(), "Opening state");

        let transport = HttpTransport::new(
            config.control_plane.base_url.clone(),
            config.gateway.request_timeout(),
        )?;
        let gateway = Arc::new(ResilientGateway::new(
            Arc::new(transport),
            Arc::new(EnvTokenProvider::new(config.control_plane.token_env.clone())),
            Arc::new(TokioClock),
            config.gateway.clone(),
        ));

        let store = FileResourceStore::open(storage.registry_path()).await?;
        let registry = ResourceRegistry::new(Arc::new(store));
        let lineage = Arc::new(FileLineageStore::open(storage.lineage_path()).await?);
        let journal = Arc::new(FileJournal::open(storage.journal_path()).await?);

        let audit_path = storage.audit_path();
        let audit: Arc<dyn AuditSink> = Arc::new(CompositeSink::new(vec![
            Arc::new(FileAuditSink::new(audit_path.clone()).await?),
            Arc::new(TracingAuditSink::new()),
        ]));

        let provisioner = Provisioner::new(gateway, registry);
        let transactions = Arc::new(TransactionManager::new(journal, audit.clone()));
        let orchestrator = PromotionOrchestrator::new(
            config.promotion.clone(),
            provisioner,
            transactions,
            lineage,
            audit,
        );

        Ok(Self {
            orchestrator,
            audit_path,
        })
    }
}

/// Read an artifact bundle from YAML or JSON (by extension, YAML otherwise)
pub async fn load_bundle(path: &Path) -> CliResult<ArtifactBundle> {
    let raw = tokio::fs::read_to_string(path).await?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");

    let parsed = if is_json {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| CliError::Bundle {
        path: path.to_path_buf(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_types::{CapacityTier, ResourceKind, Stage};

    #[tokio::test]
    async fn test_load_yaml_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.yaml");
        tokio::fs::write(
            &path,
            r#"
version: 1.4.0
resources:
  - kind: workspace
    logical_name: analytics
    capacity_tier: premium
  - kind: lakehouse
    logical_name: sales
    workspace: analytics
"#,
        )
        .await
        .unwrap();

        let bundle = load_bundle(&path).await.unwrap();
        assert_eq!(bundle.version.to_string(), "v1.4.0");
        assert_eq!(bundle.resources.len(), 2);
        assert_eq!(bundle.resources[0].capacity_tier, CapacityTier::Premium);
        let key = bundle.resources[1].key_for(&Stage::new("dev"));
        assert_eq!(key.kind, ResourceKind::Lakehouse);
    }

    #[tokio::test]
    async fn test_malformed_bundle_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        tokio::fs::write(&path, "{\"version\": \"not-semver\"}").await.unwrap();

        let err = load_bundle(&path).await.unwrap_err();
        assert!(matches!(err, CliError::Bundle { .. }));
        assert_eq!(err.exit_code(), stagecraft_types::outcome::EXIT_VALIDATION);
    }
}
