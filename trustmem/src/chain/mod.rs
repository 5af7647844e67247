//! Chain engine: computes and links per-record hashes into chains.
//!
//! Responsibilities:
//! - Assign sequence numbers and link new elements to the chain tail
//!   (or to the deterministic genesis hash for the first element).
//! - Batch appends that join several derived records to a chain in one
//!   atomic pass.
//! - Retry the whole read-compute-insert cycle when a concurrent writer
//!   wins the sequence slot; the storage unique index makes the race
//!   detectable, the retry loop makes it recoverable.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::ChainConfig;
use crate::error::ChainError;
use crate::hasher;
use crate::store::ChainStore;
use crate::types::{ChainElement, ChainStatus, Owner};

pub mod verify;

pub use verify::{ChainVerifier, VerificationResult};

/// Produces the next linked element(s) for a chain.
#[derive(Clone)]
pub struct ChainEngine {
    store: Arc<dyn ChainStore>,
    config: ChainConfig,
}

impl ChainEngine {
    pub fn new(store: Arc<dyn ChainStore>, config: ChainConfig) -> Self {
        Self { store, config }
    }

    /// Deterministic hash standing in for "element 0" of `chain_id`.
    pub fn genesis_hash(&self, chain_id: &str) -> String {
        hasher::genesis_hash(chain_id)
    }

    /// Append one record to `chain_id`, linking it to the current tail.
    ///
    /// The element is persisted through the store; on a sequence
    /// collision the whole cycle re-runs from a fresh tail read, bounded
    /// by [`ChainConfig::max_append_retries`].
    pub fn append(
        &self,
        chain_id: &str,
        content: &[u8],
        source_hash: Option<&str>,
    ) -> Result<ChainElement, ChainError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let element = self.next_element(chain_id, content, source_hash)?;
            match self.store.insert_element(&element) {
                Ok(()) => {
                    log::debug!(
                        "[trustmem] appended sequence {} to chain '{}'",
                        element.sequence,
                        chain_id
                    );
                    return Ok(element);
                }
                Err(ChainError::StorageConflict { sequence, .. })
                    if attempts < self.config.max_append_retries =>
                {
                    log::warn!(
                        "[trustmem] sequence {} on chain '{}' taken by concurrent writer, \
                         retrying (attempt {})",
                        sequence,
                        chain_id,
                        attempts
                    );
                }
                Err(ChainError::StorageConflict { .. }) => {
                    return Err(ChainError::AppendFailed {
                        chain_id: chain_id.to_string(),
                        attempts,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append several records in one pass, linked to each other and to
    /// the existing tail with consecutive sequence numbers.
    ///
    /// Used when multiple derived records (e.g. several memories
    /// extracted from one entry) must join a chain together. The batch
    /// is persisted atomically; a conflict retries the whole batch and
    /// never leaves a partial chain mutation. An empty batch is a no-op.
    pub fn append_batch(
        &self,
        chain_id: &str,
        contents: &[Vec<u8>],
        source_hash: Option<&str>,
    ) -> Result<Vec<ChainElement>, ChainError> {
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let elements = self.next_batch(chain_id, contents, source_hash)?;
            match self.store.insert_elements(&elements) {
                Ok(()) => {
                    log::debug!(
                        "[trustmem] appended batch of {} to chain '{}' (sequences {}..={})",
                        elements.len(),
                        chain_id,
                        elements[0].sequence,
                        elements[elements.len() - 1].sequence
                    );
                    return Ok(elements);
                }
                Err(ChainError::StorageConflict { .. })
                    if attempts < self.config.max_append_retries =>
                {
                    log::warn!(
                        "[trustmem] batch append on chain '{}' lost the sequence race, \
                         retrying (attempt {})",
                        chain_id,
                        attempts
                    );
                }
                Err(ChainError::StorageConflict { .. }) => {
                    return Err(ChainError::AppendFailed {
                        chain_id: chain_id.to_string(),
                        attempts,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Summary of the owner's default chain.
    ///
    /// Counts hidden elements against the stored elements rather than
    /// deriving them from the tail sequence, so the summary agrees with
    /// the canonical view even over a chain whose numbering is damaged.
    pub fn status(&self, owner: &Owner) -> Result<ChainStatus, ChainError> {
        let chain_id = owner.chain_id();
        let elements = self.store.list_elements(&chain_id)?;
        let active = self.store.active_checkpoint(&owner.id)?;

        let hidden_count = match &active {
            Some(checkpoint) => elements
                .iter()
                .filter(|e| e.sequence > checkpoint.after_sequence)
                .count() as u64,
            None => 0,
        };

        Ok(ChainStatus {
            chain_length: elements.len() as u64,
            latest_hash: elements.last().map(|e| e.hash.clone()),
            genesis_hash: hasher::genesis_hash(&chain_id),
            has_active_checkpoint: active.is_some(),
            hidden_count,
        })
    }

    /// Compute the next element from the current tail without inserting.
    fn next_element(
        &self,
        chain_id: &str,
        content: &[u8],
        source_hash: Option<&str>,
    ) -> Result<ChainElement, ChainError> {
        let tail = self.store.tail(chain_id)?;
        let (sequence, previous_hash) = match &tail {
            Some(tail) => (tail.sequence + 1, tail.hash.clone()),
            None => (1, hasher::genesis_hash(chain_id)),
        };
        build_element(chain_id, sequence, previous_hash, content, source_hash)
    }

    fn next_batch(
        &self,
        chain_id: &str,
        contents: &[Vec<u8>],
        source_hash: Option<&str>,
    ) -> Result<Vec<ChainElement>, ChainError> {
        let tail = self.store.tail(chain_id)?;
        let (mut sequence, mut previous_hash) = match &tail {
            Some(tail) => (tail.sequence + 1, tail.hash.clone()),
            None => (1, hasher::genesis_hash(chain_id)),
        };

        let mut elements = Vec::with_capacity(contents.len());
        for content in contents {
            let element = build_element(chain_id, sequence, previous_hash, content, source_hash)?;
            previous_hash = element.hash.clone();
            sequence += 1;
            elements.push(element);
        }
        Ok(elements)
    }
}

impl std::fmt::Debug for ChainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// Populate one fully linked element. The canonical timestamp is
/// captured exactly once, here.
fn build_element(
    chain_id: &str,
    sequence: u64,
    previous_hash: String,
    content: &[u8],
    source_hash: Option<&str>,
) -> Result<ChainElement, ChainError> {
    let canonical_timestamp = hasher::canonical_now();
    let content_hash = hasher::content_hash(content);
    let hash = hasher::link_hash(&hasher::LinkFields {
        sequence,
        previous_hash: &previous_hash,
        chain_id,
        content_hash: &content_hash,
        source_hash,
        canonical_timestamp: hasher::canonical_timestamp_string(&canonical_timestamp),
    })?;

    Ok(ChainElement {
        element_id: Uuid::new_v4().to_string(),
        chain_id: chain_id.to_string(),
        sequence,
        previous_hash,
        content_hash,
        source_hash: source_hash.map(|s| s.to_string()),
        canonical_timestamp,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::agent_chain_id;
    use pretty_assertions::assert_eq;

    fn engine() -> (Arc<InMemoryStore>, ChainEngine) {
        let store = Arc::new(InMemoryStore::new());
        let engine = ChainEngine::new(store.clone(), ChainConfig::default());
        (store, engine)
    }

    #[test]
    fn test_first_element_links_to_genesis() {
        let (_store, engine) = engine();
        let element = engine.append("user:1", b"a", None).unwrap();
        assert_eq!(element.sequence, 1);
        assert_eq!(element.previous_hash, hasher::genesis_hash("user:1"));
        assert_eq!(element.content_hash, hasher::content_hash(b"a"));
    }

    #[test]
    fn test_sequential_appends_link_to_each_other() {
        let (_store, engine) = engine();
        let mut previous: Option<ChainElement> = None;
        for content in [&b"a"[..], b"b", b"c", b"d"] {
            let element = engine.append("user:1", content, None).unwrap();
            if let Some(prev) = &previous {
                assert_eq!(element.sequence, prev.sequence + 1);
                assert_eq!(element.previous_hash, prev.hash);
            }
            previous = Some(element);
        }
    }

    #[test]
    fn test_chains_do_not_share_sequences() {
        let (_store, engine) = engine();
        engine.append("user:1", b"a", None).unwrap();
        let reader = engine
            .append(&agent_chain_id("user:1", "reader"), b"b", None)
            .unwrap();
        assert_eq!(reader.sequence, 1);
        assert_eq!(
            reader.previous_hash,
            hasher::genesis_hash("user:1:agent:reader")
        );
    }

    #[test]
    fn test_source_hash_carried_not_linked() {
        let (_store, engine) = engine();
        let entry = engine.append("user:1", b"entry", None).unwrap();
        let memory = engine
            .append(
                &agent_chain_id("user:1", "reader"),
                b"memory",
                Some(&entry.hash),
            )
            .unwrap();
        assert_eq!(memory.source_hash.as_deref(), Some(entry.hash.as_str()));
        // The link still goes through the memory chain's own genesis.
        assert_eq!(
            memory.previous_hash,
            hasher::genesis_hash("user:1:agent:reader")
        );
    }

    #[test]
    fn test_batch_assigns_consecutive_sequences() {
        let (_store, engine) = engine();
        engine.append("user:1", b"tail", None).unwrap();
        let batch = engine
            .append_batch(
                "user:1",
                &[b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()],
                None,
            )
            .unwrap();
        assert_eq!(
            batch.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert_eq!(batch[1].previous_hash, batch[0].hash);
        assert_eq!(batch[2].previous_hash, batch[1].hash);
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let (store, engine) = engine();
        let batch = engine.append_batch("user:1", &[], None).unwrap();
        assert!(batch.is_empty());
        assert!(store.tail("user:1").unwrap().is_none());
    }

    #[test]
    fn test_status_reflects_tail_and_checkpoint() {
        let (_store, engine) = engine();
        let owner = Owner::trusted("user:1");

        let empty = engine.status(&owner).unwrap();
        assert_eq!(empty.chain_length, 0);
        assert_eq!(empty.latest_hash, None);
        assert!(!empty.has_active_checkpoint);

        let e1 = engine.append("user:1", b"a", None).unwrap();
        let status = engine.status(&owner).unwrap();
        assert_eq!(status.chain_length, 1);
        assert_eq!(status.latest_hash, Some(e1.hash));
        assert_eq!(status.genesis_hash, hasher::genesis_hash("user:1"));
    }

    #[test]
    fn test_status_hidden_count_matches_stored_elements() {
        let (_store, engine) = engine();
        let elements: Vec<_> = [&b"a"[..], b"b", b"c"]
            .iter()
            .map(|c| engine.append("user:1", c, None).unwrap())
            .collect();

        // Re-persist with element 2 missing: deriving hidden elements
        // from the tail sequence would claim two where only one exists.
        let damaged = Arc::new(InMemoryStore::new());
        damaged.insert_element(&elements[0]).unwrap();
        damaged.insert_element(&elements[2]).unwrap();
        damaged
            .insert_checkpoint(&crate::types::Checkpoint {
                checkpoint_id: "cp-1".to_string(),
                owner_id: "user:1".to_string(),
                kind: crate::types::CheckpointKind::Rollback,
                after_sequence: 1,
                created_by: "user:1".to_string(),
                authorized_by: "human".to_string(),
                active: true,
                reason: "distrust recent entries".to_string(),
                created_at: hasher::canonical_now(),
                deactivated_at: None,
            })
            .unwrap();

        let engine = ChainEngine::new(damaged, ChainConfig::default());
        let status = engine.status(&Owner::trusted("user:1")).unwrap();
        assert_eq!(status.chain_length, 2);
        assert_eq!(status.hidden_count, 1);
        assert_eq!(status.latest_hash.as_deref(), Some(elements[2].hash.as_str()));
    }

    /// Store wrapper that reports a sequence conflict for the first
    /// `conflicts` inserts, simulating a concurrent writer winning the
    /// slot.
    struct ContendedStore {
        inner: InMemoryStore,
        remaining: std::sync::Mutex<u32>,
    }

    impl ContendedStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                remaining: std::sync::Mutex::new(conflicts),
            }
        }

        fn take_conflict(&self, chain_id: &str, sequence: u64) -> Option<ChainError> {
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Some(ChainError::StorageConflict {
                    chain_id: chain_id.to_string(),
                    sequence,
                })
            } else {
                None
            }
        }
    }

    impl ChainStore for ContendedStore {
        fn tail(&self, chain_id: &str) -> Result<Option<ChainElement>, ChainError> {
            self.inner.tail(chain_id)
        }
        fn insert_element(&self, element: &ChainElement) -> Result<(), ChainError> {
            if let Some(err) = self.take_conflict(&element.chain_id, element.sequence) {
                return Err(err);
            }
            self.inner.insert_element(element)
        }
        fn insert_elements(&self, elements: &[ChainElement]) -> Result<(), ChainError> {
            if let Some(first) = elements.first() {
                if let Some(err) = self.take_conflict(&first.chain_id, first.sequence) {
                    return Err(err);
                }
            }
            self.inner.insert_elements(elements)
        }
        fn list_elements(&self, chain_id: &str) -> Result<Vec<ChainElement>, ChainError> {
            self.inner.list_elements(chain_id)
        }
        fn get_element(&self, element_id: &str) -> Result<Option<ChainElement>, ChainError> {
            self.inner.get_element(element_id)
        }
        fn insert_checkpoint(
            &self,
            checkpoint: &crate::types::Checkpoint,
        ) -> Result<(), ChainError> {
            self.inner.insert_checkpoint(checkpoint)
        }
        fn update_checkpoint(
            &self,
            checkpoint: &crate::types::Checkpoint,
        ) -> Result<(), ChainError> {
            self.inner.update_checkpoint(checkpoint)
        }
        fn active_checkpoint(
            &self,
            owner_id: &str,
        ) -> Result<Option<crate::types::Checkpoint>, ChainError> {
            self.inner.active_checkpoint(owner_id)
        }
        fn insert_audit(&self, entry: &crate::types::AuditEntry) -> Result<(), ChainError> {
            self.inner.insert_audit(entry)
        }
        fn query_audit(
            &self,
            owner_id: &str,
            filter: &crate::types::AuditFilter,
        ) -> Result<Vec<crate::types::AuditEntry>, ChainError> {
            self.inner.query_audit(owner_id, filter)
        }
    }

    #[test]
    fn test_append_retries_after_sequence_conflict() {
        let store = Arc::new(ContendedStore::new(2));
        let engine = ChainEngine::new(store, ChainConfig::default());
        // Two conflicts, third attempt wins within the default bound.
        let element = engine.append("user:1", b"a", None).unwrap();
        assert_eq!(element.sequence, 1);
    }

    #[test]
    fn test_append_surfaces_append_failed_when_retries_exhausted() {
        let store = Arc::new(ContendedStore::new(10));
        let engine = ChainEngine::new(store, ChainConfig::default());
        let err = engine.append("user:1", b"a", None).unwrap_err();
        assert!(matches!(
            err,
            ChainError::AppendFailed { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_batch_retries_then_links_to_fresh_tail() {
        let store = Arc::new(ContendedStore::new(1));
        let engine = ChainEngine::new(store, ChainConfig::default());
        let batch = engine
            .append_batch("user:1", &[b"a".to_vec(), b"b".to_vec()], None)
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sequence, 1);
    }
}
