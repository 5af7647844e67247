//! Canonical serialization and SHA-256 digest computation.
//!
//! Responsibilities:
//! - Content hashing over raw bytes, independent of chain position.
//! - Link hashing over a canonical JSON payload with fixed key order and
//!   a fixed timestamp rendering, so two implementations produce
//!   byte-identical digest input.
//! - Deterministic genesis hashes, recomputable from the chain id alone.
//!
//! Everything here is pure: no I/O, no clocks, no side effects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ChainError;
use crate::types::ChainElement;

/// Prefix mixed into every genesis hash so a genesis digest can never
/// collide with a content or link digest of the same chain id.
const GENESIS_PREFIX: &str = "trusted-memory:genesis:";

/// Timestamp rendering used inside the canonical link payload:
/// ISO-8601 UTC with exactly microsecond precision.
const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// The exact fields contributing to an element's `hash`, in the exact
/// serialization order. Field order here *is* the canonical key order;
/// do not reorder.
#[derive(Debug, Serialize)]
pub struct LinkFields<'a> {
    pub sequence: u64,
    pub previous_hash: &'a str,
    pub chain_id: &'a str,
    pub content_hash: &'a str,
    pub source_hash: Option<&'a str>,
    pub canonical_timestamp: String,
}

fn hex_digest(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over raw content bytes, rendered as lowercase hex.
///
/// Empty or absent content hashes the empty byte string; null is never
/// propagated into the chain.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex_digest(hasher)
}

/// Deterministic hash standing in for "element 0" of a chain.
/// Recomputed on demand, never persisted.
pub fn genesis_hash(chain_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_PREFIX.as_bytes());
    hasher.update(chain_id.as_bytes());
    hex_digest(hasher)
}

/// Render a timestamp the canonical way (microsecond precision, UTC).
pub fn canonical_timestamp_string(ts: &DateTime<Utc>) -> String {
    ts.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
}

/// Capture "now" truncated to microsecond precision, so the stored
/// timestamp round-trips exactly through the canonical rendering and
/// through integer-microsecond storage columns.
pub fn canonical_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// SHA-256 over the canonical JSON payload of the link fields.
pub fn link_hash(fields: &LinkFields<'_>) -> Result<String, ChainError> {
    let payload = serde_json::to_vec(fields)?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(hex_digest(hasher))
}

/// Recompute an element's link hash from its own stored fields.
/// Used by the verifier to detect post-creation tampering.
pub fn element_hash(element: &ChainElement) -> Result<String, ChainError> {
    link_hash(&LinkFields {
        sequence: element.sequence,
        previous_hash: &element.previous_hash,
        chain_id: &element.chain_id,
        content_hash: &element.content_hash,
        source_hash: element.source_hash.as_deref(),
        canonical_timestamp: canonical_timestamp_string(&element.canonical_timestamp),
    })
}
