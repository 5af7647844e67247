//! Rollback checkpoints: human-authorized visibility gates over a
//! chain.
//!
//! A rollback never deletes or mutates elements; it hides everything
//! past `after_sequence` from canonical reads until a human-authorized
//! recovery restores full visibility. "The active checkpoint" is a
//! single-value invariant enforced here: creating a rollback while one
//! is active is rejected rather than left ambiguous.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::ChainError;
use crate::hasher;
use crate::store::ChainStore;
use crate::types::{
    AuditAction, AuditOutcome, ChainElement, Checkpoint, CheckpointKind, Owner,
};

/// The only actor value accepted for checkpoint creation and recovery.
/// Agents can never self-authorize a rollback.
pub const HUMAN_ACTOR: &str = "human";

/// State machine over one checkpoint lifecycle per owner:
/// `None -> Active(rollback) -> Deactivated`.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn ChainStore>,
    audit: AuditLog,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn ChainStore>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    /// Create an active rollback checkpoint for `owner`.
    ///
    /// `after_sequence` of `None` uses the current chain tail: a no-op
    /// rollback marking "everything so far is canonical", used to
    /// snapshot trust before risky operations.
    pub fn create_rollback(
        &self,
        owner: &Owner,
        after_sequence: Option<u64>,
        authorized_by: &str,
        reason: &str,
    ) -> Result<Checkpoint, ChainError> {
        require_human(authorized_by)?;

        if self.store.active_checkpoint(&owner.id)?.is_some() {
            return Err(ChainError::CheckpointAlreadyActive {
                owner_id: owner.id.clone(),
            });
        }

        let tail = self.store.tail(&owner.chain_id())?;
        let tail_sequence = match tail {
            Some(tail) => tail.sequence,
            None => {
                return Err(ChainError::NoChainedEntries {
                    owner_id: owner.id.clone(),
                })
            }
        };
        let after_sequence = after_sequence.unwrap_or(tail_sequence);

        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            kind: CheckpointKind::Rollback,
            after_sequence,
            created_by: owner.id.clone(),
            authorized_by: authorized_by.to_string(),
            active: true,
            reason: reason.to_string(),
            created_at: hasher::canonical_now(),
            deactivated_at: None,
        };

        self.store.insert_checkpoint(&checkpoint)?;
        self.audit.record(
            &owner.id,
            None,
            AuditAction::RollbackCreated,
            authorized_by,
            AuditOutcome::Success,
            &format!(
                "rollback after sequence {}: {}",
                checkpoint.after_sequence, reason
            ),
        )?;

        log::info!(
            "[trustmem] rollback checkpoint created for owner '{}' after sequence {}",
            owner.id,
            checkpoint.after_sequence
        );
        Ok(checkpoint)
    }

    /// The most recent checkpoint still active for `owner`, if any.
    pub fn get_active_checkpoint(&self, owner: &Owner) -> Result<Option<Checkpoint>, ChainError> {
        self.store.active_checkpoint(&owner.id)
    }

    /// The elements canonically visible for `owner`: everything up to
    /// the active checkpoint's `after_sequence`, or the whole chain
    /// when no checkpoint is active. Pure visibility filter; no element
    /// is deleted or mutated by a rollback.
    pub fn canonical_view(&self, owner: &Owner) -> Result<Vec<ChainElement>, ChainError> {
        let elements = self.store.list_elements(&owner.chain_id())?;
        match self.store.active_checkpoint(&owner.id)? {
            Some(checkpoint) => Ok(elements
                .into_iter()
                .filter(|e| e.sequence <= checkpoint.after_sequence)
                .collect()),
            None => Ok(elements),
        }
    }

    /// Deactivate the active checkpoint, restoring full visibility.
    pub fn recover(&self, owner: &Owner, authorized_by: &str) -> Result<Checkpoint, ChainError> {
        require_human(authorized_by)?;

        let mut checkpoint = self
            .store
            .active_checkpoint(&owner.id)?
            .ok_or_else(|| ChainError::NoActiveCheckpoint {
                owner_id: owner.id.clone(),
            })?;

        checkpoint.active = false;
        checkpoint.deactivated_at = Some(hasher::canonical_now());
        self.store.update_checkpoint(&checkpoint)?;

        self.audit.record(
            &owner.id,
            None,
            AuditAction::Recovery,
            authorized_by,
            AuditOutcome::Success,
            &format!(
                "recovered from rollback after sequence {}",
                checkpoint.after_sequence
            ),
        )?;

        log::info!(
            "[trustmem] checkpoint '{}' deactivated for owner '{}'",
            checkpoint.checkpoint_id,
            owner.id
        );
        Ok(checkpoint)
    }

    /// Number of elements hidden by the active checkpoint (0 when none).
    pub fn hidden_count(&self, owner: &Owner) -> Result<u64, ChainError> {
        let checkpoint = match self.store.active_checkpoint(&owner.id)? {
            Some(checkpoint) => checkpoint,
            None => return Ok(0),
        };
        let elements = self.store.list_elements(&owner.chain_id())?;
        Ok(elements
            .iter()
            .filter(|e| e.sequence > checkpoint.after_sequence)
            .count() as u64)
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager").finish()
    }
}

fn require_human(authorized_by: &str) -> Result<(), ChainError> {
    if authorized_by != HUMAN_ACTOR {
        return Err(ChainError::HumanAuthorizationRequired {
            actor: authorized_by.to_string(),
        });
    }
    Ok(())
}
