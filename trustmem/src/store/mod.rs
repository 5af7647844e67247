//! Storage-agnostic persistence API for chain data.
//!
//! Responsibilities:
//! - Define a minimal trait the chain engine, verifier, checkpoint
//!   manager and audit log issue synchronous calls against.
//! - Keep the interface small so alternate backends (a host ORM, a
//!   remote service) can slot in for testing or embedding.
//!
//! The storage boundary is the race arbiter for concurrent appends:
//! implementations must enforce a unique `(chain_id, sequence)` pair and
//! surface a violation as [`ChainError::StorageConflict`], which the
//! engine treats as retryable.

use crate::error::ChainError;
use crate::types::{AuditEntry, AuditFilter, ChainElement, Checkpoint};

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Minimal storage-agnostic persistence API.
///
/// Notes:
/// - Implementations must be `Send + Sync` (interior mutability) so the
///   store can sit behind an `Arc` shared by all components.
/// - Reads used by verification and checkpoints must not block writers;
///   snapshot-consistent reads are sufficient.
pub trait ChainStore: Send + Sync {
    /// The element with the highest sequence on `chain_id`, if any.
    fn tail(&self, chain_id: &str) -> Result<Option<ChainElement>, ChainError>;

    /// Insert one element. A `(chain_id, sequence)` collision is
    /// reported as [`ChainError::StorageConflict`].
    fn insert_element(&self, element: &ChainElement) -> Result<(), ChainError>;

    /// Insert a batch atomically: either every element is persisted or
    /// none is. A collision on any element aborts the whole batch.
    fn insert_elements(&self, elements: &[ChainElement]) -> Result<(), ChainError>;

    /// All elements of `chain_id`, ordered by sequence ascending.
    fn list_elements(&self, chain_id: &str) -> Result<Vec<ChainElement>, ChainError>;

    /// Look up one element by its storage identity.
    fn get_element(&self, element_id: &str) -> Result<Option<ChainElement>, ChainError>;

    fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), ChainError>;

    /// Persist checkpoint lifecycle changes (deactivation). Checkpoints
    /// are never deleted.
    fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), ChainError>;

    /// The most recent still-active checkpoint for `owner_id`, if any.
    fn active_checkpoint(&self, owner_id: &str) -> Result<Option<Checkpoint>, ChainError>;

    /// Append one audit entry. Pure append; entries are never updated
    /// or deleted.
    fn insert_audit(&self, entry: &AuditEntry) -> Result<(), ChainError>;

    /// Audit entries for `owner_id`, newest first, honoring the filter.
    fn query_audit(
        &self,
        owner_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, ChainError>;
}
