//! In-memory chain store for tests and embedded use.
//!
//! Mirrors the SQLite store's semantics exactly, including the unique
//! `(chain_id, sequence)` constraint and all-or-nothing batch inserts,
//! so the engine's retry path behaves the same against either backend.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::ChainError;
use crate::store::ChainStore;
use crate::types::{AuditEntry, AuditFilter, ChainElement, Checkpoint};

#[derive(Debug, Default)]
struct Inner {
    /// Elements per chain, kept sorted by sequence.
    elements: HashMap<String, Vec<ChainElement>>,
    checkpoints: Vec<Checkpoint>,
    /// Insertion order doubles as the time order for queries.
    audit: Vec<AuditEntry>,
}

/// Mutex-guarded in-memory backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ChainError> {
        self.inner
            .lock()
            .map_err(|_| ChainError::Storage("store lock poisoned".to_string()))
    }
}

fn conflict(element: &ChainElement) -> ChainError {
    ChainError::StorageConflict {
        chain_id: element.chain_id.clone(),
        sequence: element.sequence,
    }
}

fn has_sequence(chain: &[ChainElement], sequence: u64) -> bool {
    chain.iter().any(|e| e.sequence == sequence)
}

impl ChainStore for InMemoryStore {
    fn tail(&self, chain_id: &str) -> Result<Option<ChainElement>, ChainError> {
        let inner = self.lock()?;
        Ok(inner
            .elements
            .get(chain_id)
            .and_then(|chain| chain.iter().max_by_key(|e| e.sequence))
            .cloned())
    }

    fn insert_element(&self, element: &ChainElement) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        let chain = inner.elements.entry(element.chain_id.clone()).or_default();
        if has_sequence(chain, element.sequence) {
            return Err(conflict(element));
        }
        chain.push(element.clone());
        chain.sort_by_key(|e| e.sequence);
        Ok(())
    }

    fn insert_elements(&self, elements: &[ChainElement]) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        // Check every slot before touching anything: all or nothing.
        // The batch itself counts as occupied slots, so a duplicate
        // inside it conflicts just like one already stored.
        let mut claimed: HashSet<(&str, u64)> = HashSet::new();
        for element in elements {
            if !claimed.insert((element.chain_id.as_str(), element.sequence)) {
                return Err(conflict(element));
            }
            if let Some(chain) = inner.elements.get(&element.chain_id) {
                if has_sequence(chain, element.sequence) {
                    return Err(conflict(element));
                }
            }
        }
        for element in elements {
            let chain = inner.elements.entry(element.chain_id.clone()).or_default();
            chain.push(element.clone());
            chain.sort_by_key(|e| e.sequence);
        }
        Ok(())
    }

    fn list_elements(&self, chain_id: &str) -> Result<Vec<ChainElement>, ChainError> {
        let inner = self.lock()?;
        Ok(inner.elements.get(chain_id).cloned().unwrap_or_default())
    }

    fn get_element(&self, element_id: &str) -> Result<Option<ChainElement>, ChainError> {
        let inner = self.lock()?;
        Ok(inner
            .elements
            .values()
            .flatten()
            .find(|e| e.element_id == element_id)
            .cloned())
    }

    fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        inner.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        match inner
            .checkpoints
            .iter_mut()
            .find(|c| c.checkpoint_id == checkpoint.checkpoint_id)
        {
            Some(stored) => {
                *stored = checkpoint.clone();
                Ok(())
            }
            None => Err(ChainError::Storage(format!(
                "unknown checkpoint '{}'",
                checkpoint.checkpoint_id
            ))),
        }
    }

    fn active_checkpoint(&self, owner_id: &str) -> Result<Option<Checkpoint>, ChainError> {
        let inner = self.lock()?;
        Ok(inner
            .checkpoints
            .iter()
            .rev()
            .find(|c| c.owner_id == owner_id && c.active)
            .cloned())
    }

    fn insert_audit(&self, entry: &AuditEntry) -> Result<(), ChainError> {
        let mut inner = self.lock()?;
        inner.audit.push(entry.clone());
        Ok(())
    }

    fn query_audit(
        &self,
        owner_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, ChainError> {
        let inner = self.lock()?;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .rev()
            .filter(|e| e.owner_id == owner_id)
            .filter(|e| filter.action.map_or(true, |a| e.action == a))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
