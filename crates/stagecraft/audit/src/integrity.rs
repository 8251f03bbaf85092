//! Integrity chain for audit events

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::event::{AuditEvent, PartialAuditEvent};

/// Running head of a hash chain
#[derive(Debug, Default)]
pub struct IntegrityChain {
    last_hash: Option<String>,
    entry_count: u64,
}

impl IntegrityChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a chain from persisted state
    pub fn from_state(last_hash: Option<String>, entry_count: u64) -> Self {
        Self {
            last_hash,
            entry_count,
        }
    }

    pub fn previous_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Seal `partial` onto the chain and advance the head
    pub fn seal(&mut self, partial: PartialAuditEvent) -> AuditEvent {
        let event = partial.finalize(self.previous_hash());
        self.last_hash = Some(event.entry_hash.clone());
        self.entry_count += 1;
        event
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn head_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }
}

/// Result of chain verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    pub verified_entries: usize,
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// SHA-256 over the previous hash and the canonical JSON of the body
    pub fn compute_hash(body: &PartialAuditEvent, previous_hash: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous_hash.unwrap_or("").as_bytes());
        hasher.update(b"|");
        // Struct fields serialize in declaration order and context is a BTreeMap
        hasher.update(serde_json::to_vec(body).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    pub fn verify_event(event: &AuditEvent) -> bool {
        Self::compute_hash(&event.body, event.previous_hash.as_deref()) == event.entry_hash
    }

    pub fn verify_chain(events: &[AuditEvent]) -> ChainVerification {
        let mut result = ChainVerification {
            valid: true,
            total_entries: events.len(),
            verified_entries: 0,
            first_invalid_index: None,
            error_message: None,
        };

        for (i, event) in events.iter().enumerate() {
            if !Self::verify_event(event) {
                result.valid = false;
                result.first_invalid_index = Some(i);
                result.error_message = Some(format!("event {} has invalid hash", event.body.id));
                return result;
            }

            if i > 0 {
                let expected = &events[i - 1].entry_hash;
                if event.previous_hash.as_ref() != Some(expected) {
                    result.valid = false;
                    result.first_invalid_index = Some(i);
                    result.error_message = Some(format!(
                        "event {} has broken chain link (expected prev: {}, got: {:?})",
                        event.body.id, expected, event.previous_hash
                    ));
                    return result;
                }
            }

            result.verified_entries = i + 1;
        }

        result
    }
}
