//! Chain verification: replay a chain from genesis and confirm every
//! link and every hash.
//!
//! Findings are data, not errors. "The chain is broken" is an expected,
//! actionable outcome for the caller; only storage failures surface as
//! `Err`. Verification never mutates state and is safe to run
//! concurrently with appends (it may observe a slightly stale tail).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::hasher;
use crate::store::ChainStore;
use crate::types::ElementId;

/// Outcome of replaying one chain end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationResult {
    /// Every link and every hash checked out.
    Verified { length: u64 },
    /// A chain with zero elements verifies trivially.
    EmptyChain,
    /// An element does not link to its predecessor: a deletion,
    /// reordering, or injected element.
    BrokenLink {
        element_id: ElementId,
        sequence: u64,
        expected_previous: String,
        actual_previous: String,
    },
    /// An element's stored fields no longer produce its stored hash:
    /// the element itself was altered after creation.
    HashMismatch {
        element_id: ElementId,
        sequence: u64,
        expected_hash: String,
        actual_hash: String,
    },
    /// An element's position does not continue the 1-based, gap-free
    /// numbering: a renumbering whose hashes were recomputed to stay
    /// self-consistent.
    SequenceGap {
        element_id: ElementId,
        expected_sequence: u64,
        actual_sequence: u64,
    },
}

impl VerificationResult {
    pub fn is_intact(&self) -> bool {
        matches!(
            self,
            VerificationResult::Verified { .. } | VerificationResult::EmptyChain
        )
    }
}

/// Replays chains against the persisted store.
#[derive(Clone)]
pub struct ChainVerifier {
    store: Arc<dyn ChainStore>,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    /// Walk `chain_id` from genesis, checking each element's link to
    /// its predecessor and its position in the 1-based numbering before
    /// recomputing its own hash. Stops at the first finding: a broken
    /// link at element N makes everything after N unattributable anyway.
    pub fn verify(&self, chain_id: &str) -> Result<VerificationResult, ChainError> {
        let elements = self.store.list_elements(chain_id)?;
        if elements.is_empty() {
            return Ok(VerificationResult::EmptyChain);
        }

        let mut expected_previous = hasher::genesis_hash(chain_id);
        let mut expected_sequence = 1u64;
        for element in &elements {
            if element.previous_hash != expected_previous {
                log::warn!(
                    "[trustmem] broken link on chain '{}' at sequence {}",
                    chain_id,
                    element.sequence
                );
                return Ok(VerificationResult::BrokenLink {
                    element_id: element.element_id.clone(),
                    sequence: element.sequence,
                    expected_previous,
                    actual_previous: element.previous_hash.clone(),
                });
            }

            // A valid link is not enough: a self-consistent element can
            // claim any sequence while still hanging off the right
            // predecessor hash.
            if element.sequence != expected_sequence {
                log::warn!(
                    "[trustmem] sequence gap on chain '{}': expected {}, found {}",
                    chain_id,
                    expected_sequence,
                    element.sequence
                );
                return Ok(VerificationResult::SequenceGap {
                    element_id: element.element_id.clone(),
                    expected_sequence,
                    actual_sequence: element.sequence,
                });
            }

            let recomputed = hasher::element_hash(element)?;
            if recomputed != element.hash {
                log::warn!(
                    "[trustmem] hash mismatch on chain '{}' at sequence {}",
                    chain_id,
                    element.sequence
                );
                return Ok(VerificationResult::HashMismatch {
                    element_id: element.element_id.clone(),
                    sequence: element.sequence,
                    expected_hash: recomputed,
                    actual_hash: element.hash.clone(),
                });
            }

            expected_previous = element.hash.clone();
            expected_sequence += 1;
        }

        Ok(VerificationResult::Verified {
            length: elements.len() as u64,
        })
    }
}

impl std::fmt::Debug for ChainVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainVerifier").finish()
    }
}
