//! Hash-chain primitives: canonical event hashing, chain verification, and
//! Merkle roots over event batches.

use sha2::{Digest, Sha256};

use crate::event::{LedgerEvent, GENESIS_HASH};

/// Outcome of a chain verification walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    /// Index of the first event that breaks the chain, when invalid.
    pub first_break: Option<usize>,
}

impl ChainVerification {
    fn ok() -> Self {
        Self {
            valid: true,
            first_break: None,
        }
    }

    fn broken_at(index: usize) -> Self {
        Self {
            valid: false,
            first_break: Some(index),
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonical JSON of `(event identity, previous_hash)`.
///
/// Canonical form drops absent fields and sorts keys, so the digest is
/// independent of wire-level key order or explicit nulls.
pub fn compute_event_hash(event: &LedgerEvent, previous_hash: &str) -> String {
    let canonical = event.canonical_value(previous_hash);
    // Serialization of a Value::Object cannot fail.
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    sha256_hex(json.as_bytes())
}

/// SHA-256 of a raw payload, hex-encoded; used for `data_hash` fields.
pub fn compute_data_hash(data: &[u8]) -> String {
    sha256_hex(data)
}

/// Verify one event against its expected predecessor hash.
pub fn verify_event(event: &LedgerEvent, previous_hash: &str) -> bool {
    event.previous_hash == previous_hash
        && event.event_hash == compute_event_hash(event, previous_hash)
}

/// Walk a chronologically ordered chain from genesis.
pub fn verify_chain(events: &[LedgerEvent]) -> ChainVerification {
    let mut previous_hash = GENESIS_HASH;
    for (i, event) in events.iter().enumerate() {
        if event.previous_hash != previous_hash {
            tracing::error!(
                index = i,
                expected = previous_hash,
                got = %event.previous_hash,
                "chain linkage broken"
            );
            return ChainVerification::broken_at(i);
        }
        if event.event_hash != compute_event_hash(event, previous_hash) {
            tracing::error!(index = i, event_id = %event.event_id, "event hash mismatch");
            return ChainVerification::broken_at(i);
        }
        previous_hash = &event.event_hash;
    }
    ChainVerification::ok()
}

/// Index of the first invalid event, or `None` for a valid chain.
pub fn find_chain_break(events: &[LedgerEvent]) -> Option<usize> {
    verify_chain(events).first_break
}

/// Merkle root over a batch: pairwise SHA-256 reduction of the event
/// hashes, duplicating the last hash at odd levels.
pub fn merkle_root(events: &[LedgerEvent]) -> String {
    if events.is_empty() {
        return GENESIS_HASH.to_string();
    }
    let mut hashes: Vec<String> = events.iter().map(|e| e.event_hash.clone()).collect();
    while hashes.len() > 1 {
        if hashes.len() % 2 == 1 {
            hashes.push(hashes[hashes.len() - 1].clone());
        }
        hashes = hashes
            .chunks(2)
            .map(|pair| sha256_hex(format!("{}{}", pair[0], pair[1]).as_bytes()))
            .collect();
    }
    hashes.remove(0)
}

/// Recompute every hash in order. Test-only: a broken chain in production
/// means tampering and must be investigated, not repaired.
#[cfg(test)]
pub fn repair_chain(events: &[LedgerEvent]) -> Vec<LedgerEvent> {
    let mut previous_hash = GENESIS_HASH.to_string();
    events
        .iter()
        .map(|event| {
            let mut repaired = event.clone();
            repaired.previous_hash = previous_hash.clone();
            repaired.event_hash = compute_event_hash(&repaired, &previous_hash);
            previous_hash = repaired.event_hash.clone();
            repaired
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, LogFields};

    fn chain_of(n: usize) -> Vec<LedgerEvent> {
        let mut previous_hash = GENESIS_HASH.to_string();
        (0..n)
            .map(|i| {
                let mut event = LedgerEvent::new(
                    EventType::DataIngested,
                    LogFields::default()
                        .session("sess-1")
                        .meta("seq", serde_json::json!(i)),
                );
                event.previous_hash = previous_hash.clone();
                event.event_hash = compute_event_hash(&event, &previous_hash);
                previous_hash = event.event_hash.clone();
                event
            })
            .collect()
    }

    #[test]
    fn built_chain_verifies() {
        let chain = chain_of(5);
        assert_eq!(verify_chain(&chain), ChainVerification::ok());
        assert_eq!(find_chain_break(&chain), None);
    }

    #[test]
    fn empty_chain_is_valid() {
        assert!(verify_chain(&[]).valid);
    }

    #[test]
    fn metadata_tamper_breaks_chain_at_index() {
        let mut chain = chain_of(5);
        chain[3]
            .metadata
            .insert("seq".into(), serde_json::json!(999));
        let verification = verify_chain(&chain);
        assert!(!verification.valid);
        assert_eq!(verification.first_break, Some(3));
    }

    #[test]
    fn linkage_tamper_breaks_chain() {
        let mut chain = chain_of(4);
        chain[2].previous_hash = GENESIS_HASH.to_string();
        assert_eq!(find_chain_break(&chain), Some(2));
    }

    #[test]
    fn hash_is_deterministic_across_reserialization() {
        let chain = chain_of(1);
        let event = &chain[0];

        // Round-trip through the wire form; key order and field presence
        // must not affect the digest.
        let bytes = event.to_wire().unwrap();
        let reparsed = LedgerEvent::from_wire(&bytes).unwrap();
        assert_eq!(
            compute_event_hash(&reparsed, GENESIS_HASH),
            compute_event_hash(event, GENESIS_HASH)
        );
    }

    #[test]
    fn data_hash_matches_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            compute_data_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn merkle_root_changes_with_content() {
        let a = chain_of(4);
        let b = chain_of(4);
        // Different event ids yield different roots.
        assert_ne!(merkle_root(&a), merkle_root(&b));
        assert_eq!(merkle_root(&[]), GENESIS_HASH);

        // Odd batch duplicates the trailing hash rather than failing.
        assert_ne!(merkle_root(&a[..3]), merkle_root(&a));
    }

    #[test]
    fn repair_restores_validity() {
        let mut chain = chain_of(5);
        chain[1]
            .metadata
            .insert("seq".into(), serde_json::json!(42));
        assert!(!verify_chain(&chain).valid);
        let repaired = repair_chain(&chain);
        assert!(verify_chain(&repaired).valid);
    }
}
