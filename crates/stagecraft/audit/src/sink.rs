//! Audit sinks

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use stagecraft_types::RunId;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::error::{AuditError, Result};
use crate::event::{AuditEvent, PartialAuditEvent};
use crate::integrity::IntegrityChain;

/// Append-only destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, event: PartialAuditEvent) -> Result<AuditEvent>;

    async fn flush(&self) -> Result<()>;

    async fn entry_count(&self) -> Result<u64>;
}

/// Write `event`, logging instead of propagating sink failures.
pub async fn emit(sink: &dyn AuditSink, event: PartialAuditEvent) -> Option<AuditEvent> {
    let run_id = event.run_id;
    let to_state = event.to_state.clone();
    match sink.write(event).await {
        Ok(written) => Some(written),
        Err(e) => {
            warn!(run_id = %run_id, to_state = %to_state, error = %e, "Failed to write audit event");
            None
        }
    }
}

/// In-memory audit sink for testing
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    inner: RwLock<(Vec<AuditEvent>, IntegrityChain)>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.read().0.clone()
    }

    pub fn events_for_run(&self, run_id: RunId) -> Vec<AuditEvent> {
        self.inner
            .read()
            .0
            .iter()
            .filter(|e| e.body.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        *self.inner.write() = (Vec::new(), IntegrityChain::new());
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, partial: PartialAuditEvent) -> Result<AuditEvent> {
        let mut inner = self.inner.write();
        let event = inner.1.seal(partial);
        inner.0.push(event.clone());
        Ok(event)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.inner.read().1.entry_count())
    }
}

/// JSON-lines file sink with append-only writes
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    chain: Mutex<IntegrityChain>,
    // Serializes appends so file order matches chain order
    write_lock: tokio::sync::Mutex<()>,
}

impl FileAuditSink {
    /// Open (or create) the log at `path`, resuming its chain.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let existing = Self::read_file(&path).await?;
        if existing.is_empty() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
        let chain = IntegrityChain::from_state(
            existing.last().map(|e| e.entry_hash.clone()),
            existing.len() as u64,
        );

        Ok(Self {
            path,
            chain: Mutex::new(chain),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_all(&self) -> Result<Vec<AuditEvent>> {
        Self::read_file(&self.path).await
    }

    /// Parse every event in a JSON-lines audit log. A missing file is empty.
    pub async fn read_file(path: &Path) -> Result<Vec<AuditEvent>> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }

        Ok(events)
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn write(&self, partial: PartialAuditEvent) -> Result<AuditEvent> {
        let _write = self.write_lock.lock().await;

        // Seal without holding the chain lock across the file write
        let (event, json) = {
            let mut chain = self.chain.lock();
            let event = chain.seal(partial);
            let json = serde_json::to_string(&event)?;
            (event, json)
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(event)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.chain.lock().entry_count())
    }
}

/// Mirrors events into the log stream under target `stagecraft::audit`
#[derive(Debug, Default)]
pub struct TracingAuditSink {
    chain: Mutex<IntegrityChain>,
}

impl TracingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, partial: PartialAuditEvent) -> Result<AuditEvent> {
        let event = self.chain.lock().seal(partial);
        let scope = serde_json::to_string(&event.body.scope)?;
        info!(
            target: "stagecraft::audit",
            run_id = %event.body.run_id,
            operation_id = ?event.body.operation_id,
            scope = %scope,
            from_state = ?event.body.from_state,
            to_state = %event.body.to_state,
            detail = %event.body.detail,
            "audit"
        );
        Ok(event)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.chain.lock().entry_count())
    }
}

/// Fans out to several sinks. The first sink is primary: its result is
/// returned and its failure is the composite's failure. Failures of the
/// others are logged.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn add(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl AuditSink for CompositeSink {
    async fn write(&self, partial: PartialAuditEvent) -> Result<AuditEvent> {
        let Some((primary, rest)) = self.sinks.split_first() else {
            return Err(AuditError::Sink("no sinks configured".into()));
        };

        let event = primary.write(partial.clone()).await?;
        for sink in rest {
            if let Err(e) = sink.write(partial.clone()).await {
                warn!(error = %e, "Secondary audit sink failed");
            }
        }
        Ok(event)
    }

    async fn flush(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        match self.sinks.first() {
            Some(sink) => sink.entry_count().await,
            None => Ok(0),
        }
    }
}
