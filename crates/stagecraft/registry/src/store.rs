//! Record storage backends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use stagecraft_types::{ResourceKey, ResourceRecord};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Keyed persistence for [`ResourceRecord`]s.
///
/// Stores do not serialize callers; [`ResourceRegistry`](crate::ResourceRegistry)
/// holds a per-key lock around every read-modify-write.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn load(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>>;

    async fn save(&self, record: &ResourceRecord) -> Result<()>;

    /// Returns whether a record was removed.
    async fn remove(&self, key: &ResourceKey) -> Result<bool>;

    async fn list(&self) -> Result<Vec<ResourceRecord>>;
}

/// In-memory store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    records: DashMap<ResourceKey, ResourceRecord>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn load(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn save(&self, record: &ResourceRecord) -> Result<()> {
        self.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<ResourceRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

/// Single JSON document on disk, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileResourceStore {
    path: PathBuf,
    records: Mutex<BTreeMap<ResourceKey, ResourceRecord>>,
}

impl FileResourceStore {
    /// Open the store at `path`, creating it empty if missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: Vec<ResourceRecord> = read_json_or_default(&path).await?;
        debug!(path = %path.display(), records = records.len(), "Opened resource store");

        Ok(Self {
            path,
            records: Mutex::new(records.into_iter().map(|r| (r.key.clone(), r)).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<ResourceKey, ResourceRecord>) -> Result<()> {
        let all: Vec<&ResourceRecord> = records.values().collect();
        write_json_atomic(&self.path, &all).await
    }
}

#[async_trait]
impl ResourceStore for FileResourceStore {
    async fn load(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    // Memory only changes once the new document is on disk
    async fn save(&self, record: &ResourceRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(record.key.clone(), record.clone());
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> Result<bool> {
        let mut records = self.records.lock().await;
        if !records.contains_key(key) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(key);
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<ResourceRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

pub(crate) async fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(T::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_types::{Environment, RemoteId, ResourceKind, ResourceState};

    fn record(name: &str) -> ResourceRecord {
        let mut record = ResourceRecord::pending(ResourceKey::new(
            name,
            Environment::new("dev"),
            ResourceKind::Lakehouse,
        ));
        record.state = ResourceState::Created;
        record.remote_id = Some(RemoteId::new(format!("id-{name}")));
        record
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryResourceStore::new();
        let rec = record("sales");

        store.save(&rec).await.unwrap();
        assert_eq!(store.load(&rec.key).await.unwrap(), Some(rec.clone()));
        assert!(store.remove(&rec.key).await.unwrap());
        assert!(!store.remove(&rec.key).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let store = FileResourceStore::open(&path).await.unwrap();
        store.save(&record("sales")).await.unwrap();
        store.save(&record("finance")).await.unwrap();
        drop(store);

        let reopened = FileResourceStore::open(&path).await.unwrap();
        let names: Vec<_> = reopened
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key.logical_name)
            .collect();
        assert_eq!(names, vec!["finance", "sales"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let store = FileResourceStore::open(&path).await.unwrap();
        let kept = record("sales");
        store.save(&kept).await.unwrap();

        // A directory where the temp file goes makes every write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let lost = record("finance");
        assert!(store.save(&lost).await.is_err());
        assert_eq!(store.load(&lost.key).await.unwrap(), None);

        assert!(store.remove(&kept.key).await.is_err());
        assert_eq!(store.load(&kept.key).await.unwrap(), Some(kept));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
