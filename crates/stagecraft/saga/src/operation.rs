//! Journaled operation records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagecraft_types::{
    Compensation, OperationId, OperationKind, OperationStatus, ResourceKey, RunId, TransactionId,
};

/// One mutating step with its compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub transaction_id: TransactionId,
    pub run_id: RunId,
    /// Registration order within the transaction, starting at 0
    pub sequence: u32,
    pub kind: OperationKind,
    pub target: ResourceKey,
    pub compensation: Compensation,
    pub status: OperationStatus,
    /// Last forward or compensation error
    pub error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    RollingBack,
    RolledBack,
    /// Rollback finished with at least one `CompensationFailed`
    PartiallyRolledBack,
}

impl TransactionStatus {
    /// Rollback finished or never needed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::RolledBack | TransactionStatus::PartiallyRolledBack
        )
    }

    /// Left over by an interrupted process
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TransactionStatus::Active | TransactionStatus::RollingBack)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RollingBack => "rolling_back",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::PartiallyRolledBack => "partially_rolled_back",
        };
        f.write_str(s)
    }
}
