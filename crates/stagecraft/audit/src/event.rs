//! Audit event types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagecraft_types::{
    OperationId, OperationKind, OperationStatus, ResourceKey, RunId, RunStatus, Stage,
    TransactionId,
};
use uuid::Uuid;

use crate::integrity::IntegrityVerifier;

/// What the transition belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum EventScope {
    Run,
    Stage {
        stage: Stage,
    },
    Transaction {
        transaction_id: TransactionId,
    },
    Operation {
        transaction_id: TransactionId,
        kind: OperationKind,
        target: ResourceKey,
    },
}

/// Event before it is chained into a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialAuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub run_id: RunId,
    pub operation_id: Option<OperationId>,
    #[serde(flatten)]
    pub scope: EventScope,
    pub from_state: Option<String>,
    pub to_state: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PartialAuditEvent {
    fn new(run_id: RunId, scope: EventScope, from_state: Option<String>, to_state: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            operation_id: None,
            scope,
            from_state,
            to_state,
            detail: String::new(),
            context: BTreeMap::new(),
        }
    }

    /// Run state machine transition
    pub fn run(run_id: RunId, from: Option<RunStatus>, to: RunStatus) -> Self {
        Self::new(
            run_id,
            EventScope::Run,
            from.map(|s| s.to_string()),
            to.to_string(),
        )
    }

    /// Stage milestone (`started`, `committed`, `rolled_back`, ...)
    pub fn stage(run_id: RunId, stage: Stage, from: Option<&str>, to: &str) -> Self {
        Self::new(
            run_id,
            EventScope::Stage { stage },
            from.map(str::to_string),
            to.to_string(),
        )
    }

    /// Transaction begin/commit/rollback
    pub fn transaction(
        run_id: RunId,
        transaction_id: TransactionId,
        from: Option<&str>,
        to: &str,
    ) -> Self {
        Self::new(
            run_id,
            EventScope::Transaction { transaction_id },
            from.map(str::to_string),
            to.to_string(),
        )
    }

    /// Operation status transition
    pub fn operation(
        run_id: RunId,
        transaction_id: TransactionId,
        operation_id: OperationId,
        kind: OperationKind,
        target: ResourceKey,
        from: Option<OperationStatus>,
        to: OperationStatus,
    ) -> Self {
        let mut event = Self::new(
            run_id,
            EventScope::Operation {
                transaction_id,
                kind,
                target,
            },
            from.map(|s| s.to_string()),
            to.to_string(),
        );
        event.operation_id = Some(operation_id);
        event
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Chain onto `previous_hash` and seal.
    pub fn finalize(self, previous_hash: Option<String>) -> AuditEvent {
        let entry_hash = IntegrityVerifier::compute_hash(&self, previous_hash.as_deref());
        AuditEvent {
            body: self,
            previous_hash,
            entry_hash,
        }
    }
}

/// Sealed audit event as written by a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(flatten)]
    pub body: PartialAuditEvent,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditEvent {
    pub fn run_id(&self) -> RunId {
        self.body.run_id
    }

    pub fn to_state(&self) -> &str {
        &self.body.to_state
    }
}
