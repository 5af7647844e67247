//! Append-only, tamper-evident record store for agent-operated
//! accounts ("trusted memory").
//!
//! Every recorded fact is cryptographically linked to everything
//! recorded before it, so retroactive edits, deletions and reorderings
//! become detectable:
//!
//! - [`hasher`] — canonical serialization and SHA-256 digests.
//! - [`chain`] — the engine that links new records to the chain tail,
//!   and the verifier that replays a chain from genesis.
//! - [`checkpoint`] — human-authorized rollback gates over visibility.
//! - [`guard`] — denies edit/delete of chain-protected records.
//! - [`audit`] — the append-only trail of guarded operations.
//! - [`store`] — the persistence boundary (in-memory and SQLite).
//!
//! This crate is a library boundary: no wire protocol, no retrieval,
//! no distributed consensus. It assumes a single authoritative store
//! per chain; concurrent appends are serialized by the store's unique
//! `(chain_id, sequence)` constraint plus the engine's retry loop.
//!
//! ```no_run
//! use trustmem::{Owner, TrustedMemory};
//!
//! # fn main() -> Result<(), trustmem::ChainError> {
//! let memory = TrustedMemory::in_memory();
//! let owner = Owner::trusted("user:42");
//!
//! memory.append_to_chain(&owner.chain_id(), b"first fact", None)?;
//! assert!(memory.verify(&owner.chain_id())?.is_intact());
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod guard;
pub mod hasher;
pub mod store;
pub mod types;

use std::path::Path;
use std::sync::Arc;

pub use audit::AuditLog;
pub use chain::{ChainEngine, ChainVerifier, VerificationResult};
pub use checkpoint::{CheckpointManager, HUMAN_ACTOR};
pub use config::ChainConfig;
pub use error::ChainError;
pub use guard::MutationGuard;
pub use store::{ChainStore, InMemoryStore, SqliteStore};
pub use types::{
    agent_chain_id, default_chain_id, AuditAction, AuditEntry, AuditFilter, AuditOutcome,
    ChainElement, ChainId, ChainStatus, Checkpoint, CheckpointKind, ElementId, MemoryPolicy,
    MutationKind, Owner,
};

/// Facade over the full trusted-memory surface, sharing one store
/// across the engine, verifier, checkpoint manager, guard and audit
/// log.
#[derive(Debug, Clone)]
pub struct TrustedMemory {
    engine: ChainEngine,
    verifier: ChainVerifier,
    checkpoints: CheckpointManager,
    guard: MutationGuard,
    audit: AuditLog,
}

impl TrustedMemory {
    /// Build on any store implementation.
    pub fn with_store(store: Arc<dyn ChainStore>, config: ChainConfig) -> Self {
        let audit = AuditLog::new(store.clone());
        Self {
            engine: ChainEngine::new(store.clone(), config),
            verifier: ChainVerifier::new(store.clone()),
            checkpoints: CheckpointManager::new(store, audit.clone()),
            guard: MutationGuard::new(audit.clone()),
            audit,
        }
    }

    /// Purely in-memory instance (tests, embedded use). Honors the
    /// `TRUSTMEM_APPEND_RETRIES` override, see [`ChainConfig::from_env`].
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), ChainConfig::from_env())
    }

    /// SQLite-backed instance at `path`.
    pub fn open_sqlite(path: &Path, config: ChainConfig) -> Result<Self, ChainError> {
        Ok(Self::with_store(Arc::new(SqliteStore::open(path)?), config))
    }

    /// Append one record to `chain_id`. See [`ChainEngine::append`].
    pub fn append_to_chain(
        &self,
        chain_id: &str,
        content: &[u8],
        source_hash: Option<&str>,
    ) -> Result<ChainElement, ChainError> {
        self.engine.append(chain_id, content, source_hash)
    }

    /// Append several records in one linked, atomic pass.
    pub fn append_batch(
        &self,
        chain_id: &str,
        contents: &[Vec<u8>],
        source_hash: Option<&str>,
    ) -> Result<Vec<ChainElement>, ChainError> {
        self.engine.append_batch(chain_id, contents, source_hash)
    }

    /// Replay `chain_id` from genesis and report the first finding.
    pub fn verify(&self, chain_id: &str) -> Result<VerificationResult, ChainError> {
        self.verifier.verify(chain_id)
    }

    /// Summary of the owner's default chain.
    pub fn status(&self, owner: &Owner) -> Result<ChainStatus, ChainError> {
        self.engine.status(owner)
    }

    /// Create a human-authorized rollback checkpoint.
    pub fn create_rollback(
        &self,
        owner: &Owner,
        after_sequence: Option<u64>,
        authorized_by: &str,
        reason: &str,
    ) -> Result<Checkpoint, ChainError> {
        self.checkpoints
            .create_rollback(owner, after_sequence, authorized_by, reason)
    }

    /// Deactivate the active checkpoint, restoring full visibility.
    pub fn recover(&self, owner: &Owner, authorized_by: &str) -> Result<Checkpoint, ChainError> {
        self.checkpoints.recover(owner, authorized_by)
    }

    /// The currently active checkpoint, if any.
    pub fn get_active_checkpoint(
        &self,
        owner: &Owner,
    ) -> Result<Option<Checkpoint>, ChainError> {
        self.checkpoints.get_active_checkpoint(owner)
    }

    /// Elements canonically visible under the active checkpoint.
    pub fn canonical_view(&self, owner: &Owner) -> Result<Vec<ChainElement>, ChainError> {
        self.checkpoints.canonical_view(owner)
    }

    /// Elements hidden by the active checkpoint.
    pub fn hidden_count(&self, owner: &Owner) -> Result<u64, ChainError> {
        self.checkpoints.hidden_count(owner)
    }

    /// Deny (and audit) an edit/delete attempt on a protected record.
    pub fn guard_mutation(
        &self,
        owner: &Owner,
        element_id: &str,
        kind: MutationKind,
    ) -> Result<(), ChainError> {
        self.guard.guard_mutation(owner, element_id, kind)
    }

    /// Audit entries for `owner`, newest first.
    pub fn audit_log(
        &self,
        owner: &Owner,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, ChainError> {
        self.audit.query(&owner.id, filter)
    }
}
