//! Stage lineage storage.
//!
//! Per artifact version, lineage entries are kept in append order. The
//! orchestrator only appends a stage after its predecessor is present, so
//! append order is stage order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use stagecraft_types::{ArtifactVersion, RunId, Stage, StageLineage};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::store::{read_json_or_default, write_json_atomic};

#[async_trait]
pub trait LineageStore: Send + Sync {
    async fn append(&self, lineage: StageLineage) -> Result<()>;

    /// Entries for one version, oldest first.
    async fn history(&self, version: &ArtifactVersion) -> Result<Vec<StageLineage>>;

    /// Drop every entry written by `run_id`; returns how many were removed.
    async fn remove_run(&self, run_id: RunId) -> Result<usize>;

    /// Every entry across all versions.
    async fn all(&self) -> Result<Vec<StageLineage>>;

    async fn latest(&self, version: &ArtifactVersion) -> Result<Option<StageLineage>> {
        Ok(self.history(version).await?.pop())
    }

    async fn has_stage(&self, version: &ArtifactVersion, stage: &Stage) -> Result<bool> {
        Ok(self
            .history(version)
            .await?
            .iter()
            .any(|entry| &entry.stage == stage))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLineageStore {
    entries: DashMap<ArtifactVersion, Vec<StageLineage>>,
}

impl InMemoryLineageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn append(&self, lineage: StageLineage) -> Result<()> {
        self.entries
            .entry(lineage.artifact_version.clone())
            .or_default()
            .push(lineage);
        Ok(())
    }

    async fn history(&self, version: &ArtifactVersion) -> Result<Vec<StageLineage>> {
        Ok(self
            .entries
            .get(version)
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    async fn remove_run(&self, run_id: RunId) -> Result<usize> {
        let mut removed = 0;
        for mut entry in self.entries.iter_mut() {
            let before = entry.len();
            entry.retain(|l| l.run_id != run_id);
            removed += before - entry.len();
        }
        self.entries.retain(|_, v| !v.is_empty());
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<StageLineage>> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| a.promoted_at.cmp(&b.promoted_at));
        Ok(all)
    }
}

/// JSON array on disk, rewritten atomically on each change.
#[derive(Debug)]
pub struct FileLineageStore {
    path: PathBuf,
    entries: Mutex<Vec<StageLineage>>,
}

impl FileLineageStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries: Vec<StageLineage> = read_json_or_default(&path).await?;
        debug!(path = %path.display(), entries = entries.len(), "Opened lineage store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LineageStore for FileLineageStore {
    async fn append(&self, lineage: StageLineage) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.push(lineage);
        write_json_atomic(&self.path, &next).await?;
        *entries = next;
        Ok(())
    }

    async fn history(&self, version: &ArtifactVersion) -> Result<Vec<StageLineage>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|l| &l.artifact_version == version)
            .cloned()
            .collect())
    }

    async fn remove_run(&self, run_id: RunId) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let next: Vec<StageLineage> = entries
            .iter()
            .filter(|l| l.run_id != run_id)
            .cloned()
            .collect();
        let removed = entries.len() - next.len();
        if removed > 0 {
            write_json_atomic(&self.path, &next).await?;
            *entries = next;
        }
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<StageLineage>> {
        Ok(self.entries.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(version: &str, stage: &str, source: Option<&str>, run_id: RunId) -> StageLineage {
        StageLineage {
            artifact_version: version.parse().unwrap(),
            stage: Stage::new(stage),
            promoted_at: Utc::now(),
            source_stage: source.map(Stage::new),
            run_id,
        }
    }

    async fn exercise(store: &dyn LineageStore) {
        let first = RunId::generate();
        let second = RunId::generate();
        let v1: ArtifactVersion = "1.0.0".parse().unwrap();

        store.append(entry("1.0.0", "dev", None, first)).await.unwrap();
        store.append(entry("1.0.0", "test", Some("dev"), second)).await.unwrap();
        store.append(entry("2.0.0", "dev", None, second)).await.unwrap();

        assert!(store.has_stage(&v1, &Stage::new("dev")).await.unwrap());
        assert!(!store.has_stage(&v1, &Stage::new("prod")).await.unwrap());
        assert_eq!(
            store.latest(&v1).await.unwrap().map(|l| l.stage),
            Some(Stage::new("test"))
        );

        assert_eq!(store.remove_run(second).await.unwrap(), 2);
        assert_eq!(store.history(&v1).await.unwrap().len(), 1);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_lineage() {
        exercise(&InMemoryLineageStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_lineage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.json");

        let store = FileLineageStore::open(&path).await.unwrap();
        exercise(&store).await;
        drop(store);

        let reopened = FileLineageStore::open(&path).await.unwrap();
        let all = reopened.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stage, Stage::new("dev"));
    }

    #[tokio::test]
    async fn test_failed_append_is_not_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.json");
        let store = FileLineageStore::open(&path).await.unwrap();
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let v1: ArtifactVersion = "1.0.0".parse().unwrap();
        assert!(store
            .append(entry("1.0.0", "dev", None, RunId::generate()))
            .await
            .is_err());
        assert!(!store.has_stage(&v1, &Stage::new("dev")).await.unwrap());
    }
}
