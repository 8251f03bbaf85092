//! Stagecraft Saga - Transaction manager for remote provisioning
//!
//! The remote control plane has no transaction primitive, so a
//! "transaction" here is a saga: an ordered list of operations, each
//! registered together with a compensation **before** its forward action
//! runs. Rolling back replays the compensations in strict reverse
//! registration order. This is best-effort compensation, not atomic
//! commit: a compensation may itself fail, in which case the operation is
//! marked `CompensationFailed`, rollback carries on with the rest, and the
//! failure is surfaced for manual remediation.
//!
//! Every registration and status change is appended to a
//! [`TransactionJournal`] first, so transactions interrupted by a crash can
//! be rebuilt and rolled back by [`TransactionManager::recover`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod context;
pub mod error;
pub mod journal;
pub mod manager;
pub mod operation;

pub use context::TransactionContext;
pub use error::{Result, SagaError};
pub use journal::{
    replay, FileJournal, InMemoryJournal, JournalEntry, TransactionJournal, TransactionSnapshot,
};
pub use manager::{RollbackReport, TransactionManager};
pub use operation::{Operation, TransactionStatus};
