//! Write-ahead journal
//!
//! The journal is an append-only sequence of [`JournalEntry`] records.
//! [`replay`] folds it back into per-transaction snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stagecraft_types::{OperationId, OperationStatus, RunId, Stage, TransactionId};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::Result;
use crate::operation::{Operation, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    TransactionBegun {
        transaction_id: TransactionId,
        run_id: RunId,
        stage: Option<Stage>,
        at: DateTime<Utc>,
    },
    OperationRegistered {
        operation: Operation,
    },
    OperationStatusChanged {
        transaction_id: TransactionId,
        operation_id: OperationId,
        status: OperationStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },
    TransactionStatusChanged {
        transaction_id: TransactionId,
        status: TransactionStatus,
        at: DateTime<Utc>,
    },
}

/// Durable, append-only operation log.
#[async_trait]
pub trait TransactionJournal: Send + Sync {
    /// Must not return before the entry is durable.
    async fn append(&self, entry: &JournalEntry) -> Result<()>;

    async fn entries(&self) -> Result<Vec<JournalEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl TransactionJournal for InMemoryJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.entries.lock().clone())
    }
}

/// JSON-lines journal; each append is flushed and synced before returning.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileJournal {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TransactionJournal for FileJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<JournalEntry>> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// State of one transaction as reconstructed from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub run_id: RunId,
    pub stage: Option<Stage>,
    pub status: TransactionStatus,
    /// In registration order
    pub operations: Vec<Operation>,
    pub begun_at: DateTime<Utc>,
}

/// Fold journal entries into snapshots, in the order transactions began.
pub fn replay(entries: &[JournalEntry]) -> Vec<TransactionSnapshot> {
    let mut order: Vec<TransactionId> = Vec::new();
    let mut snapshots: HashMap<TransactionId, TransactionSnapshot> = HashMap::new();

    for entry in entries {
        match entry {
            JournalEntry::TransactionBegun {
                transaction_id,
                run_id,
                stage,
                at,
            } => {
                order.push(*transaction_id);
                snapshots.insert(
                    *transaction_id,
                    TransactionSnapshot {
                        id: *transaction_id,
                        run_id: *run_id,
                        stage: stage.clone(),
                        status: TransactionStatus::Active,
                        operations: Vec::new(),
                        begun_at: *at,
                    },
                );
            }
            JournalEntry::OperationRegistered { operation } => {
                if let Some(snapshot) = snapshots.get_mut(&operation.transaction_id) {
                    snapshot.operations.push(operation.clone());
                }
            }
            JournalEntry::OperationStatusChanged {
                transaction_id,
                operation_id,
                status,
                error,
                at,
            } => {
                let op = snapshots
                    .get_mut(transaction_id)
                    .and_then(|s| s.operations.iter_mut().find(|op| &op.id == operation_id));
                if let Some(op) = op {
                    op.status = *status;
                    if error.is_some() {
                        op.error = error.clone();
                    }
                    op.updated_at = *at;
                }
            }
            JournalEntry::TransactionStatusChanged {
                transaction_id,
                status,
                ..
            } => {
                if let Some(snapshot) = snapshots.get_mut(transaction_id) {
                    snapshot.status = *status;
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| snapshots.remove(&id))
        .collect()
}
