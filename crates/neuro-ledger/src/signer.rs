//! Detached signatures for critical events.
//!
//! The signing payload is a fixed subset of event fields (identity, chain
//! hashes, and a whitelist of metadata keys), canonicalised the same way as
//! the hash chain and digested with SHA-256. The key store abstraction
//! hides the signing backend; [`LocalKeyStore`] holds versioned Ed25519
//! keys in memory. Rotation creates a new version while old signatures keep
//! verifying against the key named in their `signing_key_id`.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use neuro_core::{NeuroError, NeuroResult};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::event::LedgerEvent;

/// Metadata keys included in the signing payload.
const SIGNED_METADATA_KEYS: [&str; 4] = ["resource", "action", "ip_address", "data_size_bytes"];

/// Key storage and signing backend.
pub trait KeyStore: Send + Sync {
    /// Sign a digest with the named key version.
    fn sign(&self, key_id: &str, digest: &[u8]) -> NeuroResult<Vec<u8>>;

    /// Public key bytes for the named key version.
    fn public_key(&self, key_id: &str) -> NeuroResult<Vec<u8>>;

    /// Create a new key version and return its id.
    fn new_version(&self) -> NeuroResult<String>;

    /// The key id new signatures should use.
    fn current_key_id(&self) -> String;
}

/// In-memory Ed25519 key store with version history.
pub struct LocalKeyStore {
    keyring: String,
    keys: Mutex<BTreeMap<String, SigningKey>>,
    current: Mutex<String>,
}

impl LocalKeyStore {
    pub fn new(keyring: impl Into<String>) -> Self {
        let keyring = keyring.into();
        let key_id = format!("{}/versions/1", keyring);
        let mut keys = BTreeMap::new();
        keys.insert(key_id.clone(), SigningKey::generate(&mut rand::rngs::OsRng));
        Self {
            keyring,
            keys: Mutex::new(keys),
            current: Mutex::new(key_id),
        }
    }
}

impl KeyStore for LocalKeyStore {
    fn sign(&self, key_id: &str, digest: &[u8]) -> NeuroResult<Vec<u8>> {
        let keys = self.keys.lock();
        let key = keys
            .get(key_id)
            .ok_or_else(|| NeuroError::Signature(format!("unknown key id '{}'", key_id)))?;
        Ok(key.sign(digest).to_bytes().to_vec())
    }

    fn public_key(&self, key_id: &str) -> NeuroResult<Vec<u8>> {
        let keys = self.keys.lock();
        let key = keys
            .get(key_id)
            .ok_or_else(|| NeuroError::Signature(format!("unknown key id '{}'", key_id)))?;
        Ok(key.verifying_key().to_bytes().to_vec())
    }

    fn new_version(&self) -> NeuroResult<String> {
        let mut keys = self.keys.lock();
        let version = keys.len() + 1;
        let key_id = format!("{}/versions/{}", self.keyring, version);
        keys.insert(key_id.clone(), SigningKey::generate(&mut rand::rngs::OsRng));
        *self.current.lock() = key_id.clone();
        tracing::info!(key_id = %key_id, "rotated signing key");
        Ok(key_id)
    }

    fn current_key_id(&self) -> String {
        self.current.lock().clone()
    }
}

/// Signs and verifies critical events through a [`KeyStore`].
#[derive(Clone)]
pub struct EventSigner {
    keystore: Arc<dyn KeyStore>,
}

impl EventSigner {
    pub fn new(keystore: Arc<dyn KeyStore>) -> Self {
        Self { keystore }
    }

    /// The canonical signing payload: event identity, chain hashes, the
    /// identity fields that are present, and whitelisted metadata.
    fn signing_payload(event: &LedgerEvent) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("event_id".into(), serde_json::json!(event.event_id));
        map.insert(
            "event_type".into(),
            serde_json::json!(event.event_type.as_str()),
        );
        map.insert("timestamp".into(), serde_json::json!(event.timestamp_iso()));
        map.insert("event_hash".into(), serde_json::json!(event.event_hash));
        map.insert(
            "previous_hash".into(),
            serde_json::json!(event.previous_hash),
        );

        if let Some(v) = &event.user_id {
            map.insert("user_id".into(), serde_json::json!(v));
        }
        if let Some(v) = &event.session_id {
            map.insert("session_id".into(), serde_json::json!(v));
        }
        if let Some(v) = &event.data_hash {
            map.insert("data_hash".into(), serde_json::json!(v));
        }

        let critical_metadata: serde_json::Map<String, serde_json::Value> = event
            .metadata
            .iter()
            .filter(|(k, _)| SIGNED_METADATA_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !critical_metadata.is_empty() {
            map.insert(
                "metadata".into(),
                serde_json::Value::Object(critical_metadata),
            );
        }

        serde_json::Value::Object(map)
    }

    fn payload_digest(event: &LedgerEvent) -> Vec<u8> {
        let payload = Self::signing_payload(event);
        let json = serde_json::to_string(&payload).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hasher.finalize().to_vec()
    }

    /// Sign a critical event in place, setting `signature` and
    /// `signing_key_id`. The event hash must already be assigned.
    pub fn sign_event(&self, event: &mut LedgerEvent) -> NeuroResult<()> {
        if !event.event_type.requires_signature() {
            return Err(NeuroError::Signature(format!(
                "event type {} does not require a signature",
                event.event_type.as_str()
            )));
        }
        if event.event_hash.is_empty() {
            return Err(NeuroError::Signature(
                "cannot sign before the event hash is assigned".into(),
            ));
        }
        let key_id = self.keystore.current_key_id();
        let digest = Self::payload_digest(event);
        let signature = self.keystore.sign(&key_id, &digest)?;
        event.signature = Some(BASE64.encode(signature));
        event.signing_key_id = Some(key_id);
        Ok(())
    }

    /// Verify an event's detached signature against the key named in its
    /// `signing_key_id`.
    pub fn verify_event(&self, event: &LedgerEvent) -> bool {
        let (Some(signature_b64), Some(key_id)) = (&event.signature, &event.signing_key_id)
        else {
            return false;
        };
        let Ok(signature_bytes) = BASE64.decode(signature_b64) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&signature_bytes) else {
            return false;
        };
        let Ok(public_bytes) = self.keystore.public_key(key_id) else {
            return false;
        };
        let Ok(public_array) = <[u8; 32]>::try_from(public_bytes.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_array) else {
            return false;
        };

        let digest = Self::payload_digest(event);
        verifying_key.verify(&digest, &signature).is_ok()
    }

    /// Rotate to a new key version; returns the new key id.
    pub fn rotate(&self) -> NeuroResult<String> {
        self.keystore.new_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, LogFields, GENESIS_HASH};
    use crate::hash_chain::compute_event_hash;

    fn signer() -> EventSigner {
        EventSigner::new(Arc::new(LocalKeyStore::new("test-ring/signing-key")))
    }

    fn signed_event(signer: &EventSigner) -> LedgerEvent {
        let mut event = LedgerEvent::new(
            EventType::SessionCreated,
            LogFields::default()
                .session("sess-1")
                .user("user-1")
                .meta("resource", serde_json::json!("/sessions"))
                .meta("protocol", serde_json::json!("realtime")),
        );
        event.event_hash = compute_event_hash(&event, GENESIS_HASH);
        signer.sign_event(&mut event).unwrap();
        event
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let signer = signer();
        let event = signed_event(&signer);
        assert!(event.signature.is_some());
        assert!(event.signing_key_id.is_some());
        assert!(signer.verify_event(&event));
    }

    #[test]
    fn signed_field_change_invalidates_signature() {
        let signer = signer();
        let mut event = signed_event(&signer);
        event.session_id = Some("sess-2".into());
        assert!(!signer.verify_event(&event));
    }

    #[test]
    fn signed_metadata_change_invalidates_signature() {
        let signer = signer();
        let mut event = signed_event(&signer);
        event
            .metadata
            .insert("resource".into(), serde_json::json!("/other"));
        assert!(!signer.verify_event(&event));
    }

    #[test]
    fn unsigned_field_change_preserves_signature() {
        let signer = signer();
        let mut event = signed_event(&signer);
        // "protocol" is not in the signed metadata whitelist.
        event
            .metadata
            .insert("protocol".into(), serde_json::json!("batch"));
        assert!(signer.verify_event(&event));
    }

    #[test]
    fn rotation_keeps_old_signatures_valid() {
        let signer = signer();
        let old_event = signed_event(&signer);

        let new_key = signer.rotate().unwrap();
        let new_event = signed_event(&signer);

        assert_ne!(old_event.signing_key_id, new_event.signing_key_id);
        assert_eq!(new_event.signing_key_id.as_deref(), Some(new_key.as_str()));
        assert!(signer.verify_event(&old_event));
        assert!(signer.verify_event(&new_event));
    }

    #[test]
    fn non_critical_event_refuses_to_sign() {
        let signer = signer();
        let mut event = LedgerEvent::new(EventType::DataIngested, LogFields::default());
        event.event_hash = compute_event_hash(&event, GENESIS_HASH);
        assert!(signer.sign_event(&mut event).is_err());
    }

    #[test]
    fn missing_signature_fails_verification() {
        let signer = signer();
        let mut event = LedgerEvent::new(EventType::SessionCreated, LogFields::default());
        event.event_hash = compute_event_hash(&event, GENESIS_HASH);
        assert!(!signer.verify_event(&event));

        // A placeholder string is not a verifiable signature.
        event.signature = Some("SIGNATURE_deadbeef".into());
        event.signing_key_id = Some(signer.keystore.current_key_id());
        assert!(!signer.verify_event(&event));
    }
}
