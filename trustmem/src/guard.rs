//! Mutation guard for chain-protected records.
//!
//! Edits and deletes against a trusted-memory owner are always denied,
//! and the denial is written to the audit trail *before* the error is
//! returned: an unaudited denial would be indistinguishable from a
//! bypass. Creation is never guarded; new elements go through the
//! chain engine.

use crate::audit::AuditLog;
use crate::error::ChainError;
use crate::types::{AuditAction, AuditOutcome, MutationKind, Owner};

/// Intercepts edit/delete attempts on chain-protected records.
#[derive(Debug, Clone)]
pub struct MutationGuard {
    audit: AuditLog,
}

impl MutationGuard {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }

    /// Deny the mutation for trusted owners; pass through for open
    /// owners (ordinary, non-chained records are out of scope here).
    ///
    /// Every denied attempt appends one audit entry, with no
    /// deduplication. An audit write failure fails the whole call.
    pub fn guard_mutation(
        &self,
        owner: &Owner,
        element_id: &str,
        kind: MutationKind,
    ) -> Result<(), ChainError> {
        if !owner.is_trusted() {
            return Ok(());
        }

        let verb = match kind {
            MutationKind::Edit => "edit",
            MutationKind::Delete => "delete",
        };
        self.audit.record(
            &owner.id,
            Some(element_id),
            AuditAction::from(kind),
            &owner.id,
            AuditOutcome::Denied,
            &format!("{} denied: chained element is immutable", verb),
        )?;

        log::info!(
            "[trustmem] denied {} of element '{}' for owner '{}'",
            verb,
            element_id,
            owner.id
        );
        Err(ChainError::Immutable {
            element_id: element_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChainStore, InMemoryStore};
    use crate::types::{AuditEntry, AuditFilter, ChainElement, Checkpoint};
    use std::sync::Arc;

    fn guard_over(store: Arc<InMemoryStore>) -> MutationGuard {
        MutationGuard::new(AuditLog::new(store))
    }

    #[test]
    fn test_open_owner_passes_through_silently() {
        let store = Arc::new(InMemoryStore::new());
        let guard = guard_over(store.clone());
        let owner = Owner::open("user:1");

        assert!(guard
            .guard_mutation(&owner, "el-1", MutationKind::Edit)
            .is_ok());
        let audit = AuditLog::new(store);
        assert!(audit
            .query("user:1", &AuditFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_trusted_owner_is_denied_with_audit_entry() {
        let store = Arc::new(InMemoryStore::new());
        let guard = guard_over(store.clone());
        let owner = Owner::trusted("user:1");

        let err = guard
            .guard_mutation(&owner, "el-1", MutationKind::Delete)
            .unwrap_err();
        assert!(matches!(err, ChainError::Immutable { .. }));

        let audit = AuditLog::new(store);
        let entries = audit.query("user:1", &AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::AttemptedDelete);
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert_eq!(entries[0].element_id.as_deref(), Some("el-1"));
    }

    #[test]
    fn test_repeated_attempts_each_add_an_entry() {
        let store = Arc::new(InMemoryStore::new());
        let guard = guard_over(store.clone());
        let owner = Owner::trusted("user:1");

        for _ in 0..4 {
            assert!(guard
                .guard_mutation(&owner, "el-1", MutationKind::Edit)
                .is_err());
        }
        let audit = AuditLog::new(store);
        assert_eq!(
            audit
                .query("user:1", &AuditFilter::default())
                .unwrap()
                .len(),
            4
        );
    }

    /// Store whose audit writes always fail, to prove the guard fails
    /// loudly instead of denying without a trace.
    struct AuditlessStore;

    impl ChainStore for AuditlessStore {
        fn tail(&self, _: &str) -> Result<Option<ChainElement>, ChainError> {
            Ok(None)
        }
        fn insert_element(&self, _: &ChainElement) -> Result<(), ChainError> {
            Ok(())
        }
        fn insert_elements(&self, _: &[ChainElement]) -> Result<(), ChainError> {
            Ok(())
        }
        fn list_elements(&self, _: &str) -> Result<Vec<ChainElement>, ChainError> {
            Ok(Vec::new())
        }
        fn get_element(&self, _: &str) -> Result<Option<ChainElement>, ChainError> {
            Ok(None)
        }
        fn insert_checkpoint(&self, _: &Checkpoint) -> Result<(), ChainError> {
            Ok(())
        }
        fn update_checkpoint(&self, _: &Checkpoint) -> Result<(), ChainError> {
            Ok(())
        }
        fn active_checkpoint(&self, _: &str) -> Result<Option<Checkpoint>, ChainError> {
            Ok(None)
        }
        fn insert_audit(&self, _: &AuditEntry) -> Result<(), ChainError> {
            Err(ChainError::Storage("audit log unavailable".to_string()))
        }
        fn query_audit(
            &self,
            _: &str,
            _: &AuditFilter,
        ) -> Result<Vec<AuditEntry>, ChainError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_audit_write_failure_fails_the_guarded_call() {
        let guard = MutationGuard::new(AuditLog::new(Arc::new(AuditlessStore)));
        let owner = Owner::trusted("user:1");
        let err = guard
            .guard_mutation(&owner, "el-1", MutationKind::Edit)
            .unwrap_err();
        // Storage error, not Immutable: the denial was not provable.
        assert!(matches!(err, ChainError::Storage(_)));
    }
}
