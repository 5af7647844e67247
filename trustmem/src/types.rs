//! Data types for the trusted-memory chain.
//!
//! Design goals:
//! - Small, serializable structures with explicit provenance fields.
//! - Hash-relevant fields are write-once: nothing that contributes to an
//!   element's `hash` is ever mutated after creation.
//! - Owner policy is an explicit two-variant value, not a runtime type check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a chain (opaque string).
///
/// The default per-account chain uses the owner id alone; agent-scoped
/// chains append a purpose label, e.g. `"user:42:agent:reader"`.
pub type ChainId = String;

/// Identifier of a chain element (opaque string, uuid v4).
pub type ElementId = String;

/// Chain id for an owner's default chain.
pub fn default_chain_id(owner_id: &str) -> ChainId {
    owner_id.to_string()
}

/// Chain id scoped to one agent/purpose label under an owner.
pub fn agent_chain_id(owner_id: &str, agent: &str) -> ChainId {
    format!("{}:agent:{}", owner_id, agent)
}

/// Whether an owner's records are chain-protected.
///
/// `Trusted` enables the mutation guard and chain appends; `Open` makes
/// the guard a pass-through for ordinary, non-chained records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryPolicy {
    Trusted,
    Open,
}

/// An account that owns one or more chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub policy: MemoryPolicy,
}

impl Owner {
    pub fn trusted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy: MemoryPolicy::Trusted,
        }
    }

    pub fn open(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy: MemoryPolicy::Open,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.policy == MemoryPolicy::Trusted
    }

    /// The owner's default chain id.
    pub fn chain_id(&self) -> ChainId {
        default_chain_id(&self.id)
    }
}

/// One hash-linked record in a chain.
///
/// `sequence` is 1-based, strictly increasing with no gaps and unique
/// per chain. `previous_hash` points at the element at `sequence - 1`,
/// or the chain's genesis hash at sequence 1. `canonical_timestamp` is
/// the instant used in hash computation (microsecond precision),
/// distinct from any display timestamp the host may keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainElement {
    pub element_id: ElementId,
    pub chain_id: ChainId,
    pub sequence: u64,
    pub previous_hash: String,
    pub content_hash: String,
    /// Hash of an upstream record this one was derived from (e.g. a
    /// memory element referencing the entry it was extracted from).
    /// Cross-chain provenance only; not a chain link.
    pub source_hash: Option<String>,
    pub canonical_timestamp: DateTime<Utc>,
    pub hash: String,
}

/// Checkpoint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointKind {
    Rollback,
    Snapshot,
    Recovery,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Rollback => "rollback",
            CheckpointKind::Snapshot => "snapshot",
            CheckpointKind::Recovery => "recovery",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "snapshot" => CheckpointKind::Snapshot,
            "recovery" => CheckpointKind::Recovery,
            _ => CheckpointKind::Rollback,
        }
    }
}

/// A visibility gate over an owner's chain.
///
/// While active, canonical reads exclude elements with
/// `sequence > after_sequence`. Nothing is deleted or mutated by a
/// rollback; deactivation restores full visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub owner_id: String,
    pub kind: CheckpointKind,
    pub after_sequence: u64,
    pub created_by: String,
    pub authorized_by: String,
    pub active: bool,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Guarded mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Edit,
    Delete,
}

/// Audit trail actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    AttemptedEdit,
    AttemptedDelete,
    RollbackCreated,
    Recovery,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AttemptedEdit => "attempted_edit",
            AuditAction::AttemptedDelete => "attempted_delete",
            AuditAction::RollbackCreated => "rollback_created",
            AuditAction::Recovery => "recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attempted_edit" => Some(AuditAction::AttemptedEdit),
            "attempted_delete" => Some(AuditAction::AttemptedDelete),
            "rollback_created" => Some(AuditAction::RollbackCreated),
            "recovery" => Some(AuditAction::Recovery),
            _ => None,
        }
    }
}

impl From<MutationKind> for AuditAction {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Edit => AuditAction::AttemptedEdit,
            MutationKind::Delete => AuditAction::AttemptedDelete,
        }
    }
}

/// Outcome recorded in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Denied,
    Success,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Denied => "denied",
            AuditOutcome::Success => "success",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => AuditOutcome::Success,
            _ => AuditOutcome::Denied,
        }
    }
}

/// One immutable audit trail record. Created only, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub owner_id: String,
    pub element_id: Option<ElementId>,
    pub action: AuditAction,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Filter for audit log queries.
///
/// Semantics: `action` of `None` means no action filtering; `limit` of
/// `None` means unbounded. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Summary of an owner's default chain for operator visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain_length: u64,
    pub latest_hash: Option<String>,
    pub genesis_hash: String,
    pub has_active_checkpoint: bool,
    pub hidden_count: u64,
}
