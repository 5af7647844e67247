//! Append-only audit trail of guarded operations and checkpoint
//! lifecycle transitions.
//!
//! Write failures are surfaced to the caller, never swallowed: a
//! missing audit entry for a denied mutation would be indistinguishable
//! from a bypass, which defeats the trust guarantee.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::ChainError;
use crate::hasher;
use crate::store::ChainStore;
use crate::types::{AuditAction, AuditEntry, AuditFilter, AuditOutcome};

/// Recorder and reader for the audit trail.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn ChainStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    /// Append one entry. No updates, no deletes, no conditional logic.
    pub fn record(
        &self,
        owner_id: &str,
        element_id: Option<&str>,
        action: AuditAction,
        actor: &str,
        outcome: AuditOutcome,
        details: &str,
    ) -> Result<AuditEntry, ChainError> {
        let entry = AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            element_id: element_id.map(|s| s.to_string()),
            action,
            actor: actor.to_string(),
            outcome,
            details: details.to_string(),
            timestamp: hasher::canonical_now(),
        };
        self.store.insert_audit(&entry)?;
        Ok(entry)
    }

    /// Entries for `owner_id`, newest first.
    pub fn query(
        &self,
        owner_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, ChainError> {
        self.store.query_audit(owner_id, filter)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish()
    }
}
