//! Stagecraft Audit - Structured, tamper-evident transition events
//!
//! One event is emitted per operation transition (and per run/stage
//! transition): `{timestamp, run_id, operation_id, from_state, to_state,
//! detail}`. Sinks are append-only; each event carries the SHA-256 hash of
//! its predecessor so a log can be verified after the fact.
//!
//! Emission failures never fail a run. Use [`emit`] to write an event and
//! log (rather than propagate) sink errors.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod event;
pub mod integrity;
pub mod sink;

pub use error::{AuditError, Result};
pub use event::{AuditEvent, EventScope, PartialAuditEvent};
pub use integrity::{ChainVerification, IntegrityChain, IntegrityVerifier};
pub use sink::{emit, AuditSink, CompositeSink, FileAuditSink, MemoryAuditSink, TracingAuditSink};
