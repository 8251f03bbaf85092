//! The resource registry.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use stagecraft_types::{Environment, RemoteId, ResourceKey, ResourceRecord, ResourceState};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::error::{RegistryError, Result};
use crate::store::{InMemoryResourceStore, ResourceStore};

/// Result of [`ResourceRegistry::get_or_reserve`].
#[derive(Debug)]
pub enum Lookup {
    /// Already created; no remote call needed.
    Existing(ResourceRecord),
    /// Caller now owns the key and may create it.
    Reserved(Reservation),
}

impl Lookup {
    pub fn record(&self) -> &ResourceRecord {
        match self {
            Lookup::Existing(record) => record,
            Lookup::Reserved(reservation) => reservation.record(),
        }
    }
}

/// Exclusive claim on a key.
///
/// Holds the key's lock until consumed by [`ResourceRegistry::commit`] or
/// [`ResourceRegistry::mark_failed`]. Dropping it leaves the record Pending,
/// which the next caller may reserve again.
#[derive(Debug)]
pub struct Reservation {
    record: ResourceRecord,
    previous: Option<ResourceState>,
    _guard: OwnedMutexGuard<()>,
}

impl Reservation {
    pub fn key(&self) -> &ResourceKey {
        &self.record.key
    }

    pub fn record(&self) -> &ResourceRecord {
        &self.record
    }

    /// State found before this reservation, if the key was known.
    pub fn previous_state(&self) -> Option<&ResourceState> {
        self.previous.as_ref()
    }
}

/// Idempotency ledger keyed by [`ResourceKey`].
#[derive(Clone)]
pub struct ResourceRegistry {
    store: Arc<dyn ResourceStore>,
    locks: Arc<DashMap<ResourceKey, Arc<Mutex<()>>>>,
}

impl ResourceRegistry {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryResourceStore::new()))
    }

    async fn lock(&self, key: &ResourceKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Return the Created record for `key`, or reserve the key for creation.
    ///
    /// Absent, Pending (abandoned), Failed and Deleted keys are all reserved.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get_or_reserve(&self, key: &ResourceKey) -> Result<Lookup> {
        let guard = self.lock(key).await;

        let existing = self.store.load(key).await?;
        if let Some(record) = existing.as_ref().filter(|r| r.is_created()) {
            debug!(remote_id = ?record.remote_id, "Registry hit");
            return Ok(Lookup::Existing(record.clone()));
        }

        let mut record = ResourceRecord::pending(key.clone());
        let previous = existing.map(|prior| {
            record.created_at = prior.created_at;
            prior.state
        });
        if let Some(state) = &previous {
            debug!(previous = state.name(), "Re-reserving key");
        }
        self.store.save(&record).await?;

        Ok(Lookup::Reserved(Reservation {
            record,
            previous,
            _guard: guard,
        }))
    }

    /// Pending → Created.
    #[instrument(skip(self, reservation), fields(key = %reservation.key()))]
    pub async fn commit(&self, reservation: Reservation, remote_id: RemoteId) -> Result<ResourceRecord> {
        let Reservation { mut record, _guard, .. } = reservation;
        let now = Utc::now();
        record.state = ResourceState::Created;
        record.remote_id = Some(remote_id);
        record.last_seen_at = now;
        self.store.save(&record).await?;

        info!(remote_id = ?record.remote_id, "Resource committed");
        Ok(record)
    }

    /// Pending → Failed. The key stays eligible for a later retry.
    #[instrument(skip(self, reservation), fields(key = %reservation.key()))]
    pub async fn mark_failed(&self, reservation: Reservation, reason: &str) -> Result<ResourceRecord> {
        let Reservation { mut record, _guard, .. } = reservation;
        record.state = ResourceState::Failed {
            reason: reason.to_string(),
        };
        record.last_seen_at = Utc::now();
        self.store.save(&record).await?;

        warn!(reason, "Resource marked failed");
        Ok(record)
    }

    /// Record that the remote resource is gone. Returns the record as it was
    /// before, or `None` when the key was never known.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn mark_deleted(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>> {
        let _guard = self.lock(key).await;

        let Some(before) = self.store.load(key).await? else {
            return Ok(None);
        };
        let mut record = before.clone();
        record.state = ResourceState::Deleted;
        record.last_seen_at = Utc::now();
        self.store.save(&record).await?;

        info!("Resource marked deleted");
        Ok(Some(before))
    }

    /// Refresh `last_seen_at` on a Created record.
    pub async fn touch(&self, key: &ResourceKey) -> Result<ResourceRecord> {
        let _guard = self.lock(key).await;

        let mut record = self
            .store
            .load(key)
            .await?
            .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
        if !record.is_created() {
            return Err(RegistryError::InvalidTransition {
                key: key.clone(),
                from: record.state.name(),
                to: "created",
            });
        }
        record.last_seen_at = Utc::now();
        self.store.save(&record).await?;
        Ok(record)
    }

    pub async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>> {
        self.store.load(key).await
    }

    pub async fn list(&self) -> Result<Vec<ResourceRecord>> {
        self.store.list().await
    }

    pub async fn list_environment(&self, environment: &Environment) -> Result<Vec<ResourceRecord>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| &r.key.environment == environment)
            .collect())
    }

    /// Drop a record entirely.
    pub async fn forget(&self, key: &ResourceKey) -> Result<bool> {
        let _guard = self.lock(key).await;
        self.store.remove(key).await
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("locks", &self.locks.len())
            .finish()
    }
}
