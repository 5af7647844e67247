//! Error type for trusted-memory chain operations.
//!
//! Verification findings (broken link, hash mismatch) are *not* errors:
//! they are returned as data in [`crate::chain::VerificationResult`],
//! since a broken chain is an expected, actionable outcome.

use thiserror::Error;

/// Errors surfaced by the chain engine, checkpoint manager, guard and stores.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Checkpoint creation or recovery attempted by a non-human actor.
    /// Hard policy gate; never retried, surfaced verbatim.
    #[error("human authorization required: got actor '{actor}'")]
    HumanAuthorizationRequired { actor: String },

    /// A rollback was requested for an owner whose chain has no elements.
    #[error("no chained entries exist for owner '{owner_id}'")]
    NoChainedEntries { owner_id: String },

    /// Recovery was requested while no checkpoint is active.
    #[error("no active checkpoint for owner '{owner_id}'")]
    NoActiveCheckpoint { owner_id: String },

    /// A rollback was requested while another checkpoint is still active.
    /// "The active checkpoint" is a single-value invariant.
    #[error("a checkpoint is already active for owner '{owner_id}'")]
    CheckpointAlreadyActive { owner_id: String },

    /// Mutation attempted on a chain-protected element. Always paired
    /// with a persisted audit entry recording the denial.
    #[error("element '{element_id}' is chain-protected and immutable")]
    Immutable { element_id: String },

    /// Another writer claimed the same `(chain_id, sequence)` slot.
    /// The one retryable error: the engine re-runs its
    /// read-compute-insert cycle when it sees this.
    #[error("sequence collision on chain '{chain_id}' at sequence {sequence}")]
    StorageConflict { chain_id: String, sequence: u64 },

    /// Append retries exhausted without winning a sequence slot.
    #[error("append to chain '{chain_id}' failed after {attempts} attempts")]
    AppendFailed { chain_id: String, attempts: u32 },

    /// Canonical serialization for hashing failed. Effectively
    /// unreachable for valid elements; fatal, aborts the append with
    /// no partial write.
    #[error("hash computation failed: {0}")]
    HashComputationFailed(String),

    /// Propagated persistence failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::HashComputationFailed(e.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(e: rusqlite::Error) -> Self {
        ChainError::Storage(e.to_string())
    }
}
