//! Ledger event schema.
//!
//! Events are append-only: once emitted, no field ever mutates. The dotted
//! string form of [`EventType`] is wire-visible and stable; storage and
//! hashing both derive from the canonical JSON produced here.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Genesis value of `previous_hash`.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Every event type the ledger records. The serialized form is the dotted
/// string (`session.created`, `device.error`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.started")]
    SessionStarted,
    #[serde(rename = "session.paused")]
    SessionPaused,
    #[serde(rename = "session.resumed")]
    SessionResumed,
    #[serde(rename = "session.ended")]
    SessionEnded,
    #[serde(rename = "session.error")]
    SessionError,
    #[serde(rename = "data.ingested")]
    DataIngested,
    #[serde(rename = "data.processed")]
    DataProcessed,
    #[serde(rename = "data.stored")]
    DataStored,
    #[serde(rename = "data.quality_check")]
    DataQualityCheck,
    #[serde(rename = "data.exported")]
    DataExported,
    #[serde(rename = "device.discovered")]
    DeviceDiscovered,
    #[serde(rename = "device.paired")]
    DevicePaired,
    #[serde(rename = "device.connected")]
    DeviceConnected,
    #[serde(rename = "device.disconnected")]
    DeviceDisconnected,
    #[serde(rename = "device.error")]
    DeviceError,
    #[serde(rename = "device.impedance_check")]
    DeviceImpedanceCheck,
    #[serde(rename = "ml.model_loaded")]
    ModelLoaded,
    #[serde(rename = "ml.inference")]
    ModelInference,
    #[serde(rename = "ml.calibration")]
    ModelCalibration,
    #[serde(rename = "ml.performance")]
    ModelPerformance,
    #[serde(rename = "auth.success")]
    AuthSuccess,
    #[serde(rename = "auth.failure")]
    AuthFailure,
    #[serde(rename = "access.granted")]
    AccessGranted,
    #[serde(rename = "access.denied")]
    AccessDenied,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionCreated => "session.created",
            EventType::SessionStarted => "session.started",
            EventType::SessionPaused => "session.paused",
            EventType::SessionResumed => "session.resumed",
            EventType::SessionEnded => "session.ended",
            EventType::SessionError => "session.error",
            EventType::DataIngested => "data.ingested",
            EventType::DataProcessed => "data.processed",
            EventType::DataStored => "data.stored",
            EventType::DataQualityCheck => "data.quality_check",
            EventType::DataExported => "data.exported",
            EventType::DeviceDiscovered => "device.discovered",
            EventType::DevicePaired => "device.paired",
            EventType::DeviceConnected => "device.connected",
            EventType::DeviceDisconnected => "device.disconnected",
            EventType::DeviceError => "device.error",
            EventType::DeviceImpedanceCheck => "device.impedance_check",
            EventType::ModelLoaded => "ml.model_loaded",
            EventType::ModelInference => "ml.inference",
            EventType::ModelCalibration => "ml.calibration",
            EventType::ModelPerformance => "ml.performance",
            EventType::AuthSuccess => "auth.success",
            EventType::AuthFailure => "auth.failure",
            EventType::AccessGranted => "access.granted",
            EventType::AccessDenied => "access.denied",
        }
    }

    /// Critical events carry a detached signature for compliance.
    pub fn requires_signature(&self) -> bool {
        matches!(
            self,
            EventType::SessionCreated
                | EventType::SessionEnded
                | EventType::DataExported
                | EventType::AuthSuccess
                | EventType::AuthFailure
                | EventType::AccessGranted
                | EventType::AccessDenied
                | EventType::ModelCalibration
        )
    }

    /// Events that additionally trigger the compliance check hook.
    pub fn is_compliance_event(&self) -> bool {
        matches!(
            self,
            EventType::SessionCreated
                | EventType::SessionEnded
                | EventType::DataExported
                | EventType::AccessGranted
                | EventType::AccessDenied
                | EventType::AuthSuccess
                | EventType::AuthFailure
        )
    }
}

/// One hash-chained audit event.
///
/// Optional fields are omitted (never null) in serialized form, which keeps
/// the canonical JSON identical whether a field is absent or `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// SHA-256 of the associated payload, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Hash of the predecessor event; all zeros at genesis.
    pub previous_hash: String,
    pub event_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}

/// Context fields for a new event, set by the caller of `log_event`.
#[derive(Debug, Clone, Default)]
pub struct LogFields {
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub data_hash: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LogFields {
    #[must_use]
    pub fn session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn device(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn data_hash(mut self, hash: impl Into<String>) -> Self {
        self.data_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

impl LedgerEvent {
    /// Construct an unhashed event; the ledger facade assigns the chain
    /// fields.
    pub fn new(event_type: EventType, fields: LogFields) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            session_id: fields.session_id,
            device_id: fields.device_id,
            user_id: fields.user_id,
            data_hash: fields.data_hash,
            metadata: fields.metadata,
            previous_hash: GENESIS_HASH.to_string(),
            event_hash: String::new(),
            signature: None,
            signing_key_id: None,
        }
    }

    /// Millisecond-resolution ISO-8601 timestamp used in canonical JSON and
    /// signing payloads.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The canonical hashing input: null-free, key-sorted JSON of the
    /// event's identity fields plus the given previous hash. The chain
    /// fields (`event_hash`, `signature`) are deliberately excluded.
    pub fn canonical_value(&self, previous_hash: &str) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("event_id".into(), serde_json::json!(self.event_id));
        map.insert("timestamp".into(), serde_json::json!(self.timestamp_iso()));
        map.insert(
            "event_type".into(),
            serde_json::json!(self.event_type.as_str()),
        );
        if let Some(v) = &self.session_id {
            map.insert("session_id".into(), serde_json::json!(v));
        }
        if let Some(v) = &self.device_id {
            map.insert("device_id".into(), serde_json::json!(v));
        }
        if let Some(v) = &self.user_id {
            map.insert("user_id".into(), serde_json::json!(v));
        }
        if let Some(v) = &self.data_hash {
            map.insert("data_hash".into(), serde_json::json!(v));
        }
        if !self.metadata.is_empty() {
            map.insert("metadata".into(), serde_json::json!(self.metadata));
        }
        map.insert("previous_hash".into(), serde_json::json!(previous_hash));
        serde_json::Value::Object(map)
    }

    /// Serialized wire form published to the transport.
    pub fn to_wire(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_wire(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings_are_stable() {
        assert_eq!(EventType::SessionCreated.as_str(), "session.created");
        assert_eq!(EventType::DataQualityCheck.as_str(), "data.quality_check");
        assert_eq!(EventType::ModelInference.as_str(), "ml.inference");

        let json = serde_json::to_string(&EventType::DeviceImpedanceCheck).unwrap();
        assert_eq!(json, "\"device.impedance_check\"");
        let back: EventType = serde_json::from_str("\"access.denied\"").unwrap();
        assert_eq!(back, EventType::AccessDenied);
    }

    #[test]
    fn critical_and_compliance_sets() {
        assert!(EventType::SessionCreated.requires_signature());
        assert!(EventType::ModelCalibration.requires_signature());
        assert!(!EventType::DataIngested.requires_signature());

        assert!(EventType::AuthFailure.is_compliance_event());
        // Calibration is critical but not in the compliance subset.
        assert!(!EventType::ModelCalibration.is_compliance_event());
    }

    #[test]
    fn canonical_value_omits_absent_fields() {
        let event = LedgerEvent::new(EventType::DataIngested, LogFields::default());
        let value = event.canonical_value(GENESIS_HASH);
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("session_id"));
        assert!(!obj.contains_key("metadata"));
        assert!(!obj.contains_key("event_hash"));
        assert!(obj.contains_key("previous_hash"));
    }

    #[test]
    fn wire_roundtrip_preserves_event() {
        let event = LedgerEvent::new(
            EventType::DeviceConnected,
            LogFields::default()
                .device("dev-0")
                .meta("device_type", serde_json::json!("synthetic")),
        );
        let bytes = event.to_wire().unwrap();
        let back = LedgerEvent::from_wire(&bytes).unwrap();
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.event_type, EventType::DeviceConnected);
        assert_eq!(back.device_id.as_deref(), Some("dev-0"));
    }

    #[test]
    fn wire_form_omits_none_fields() {
        let event = LedgerEvent::new(EventType::DataIngested, LogFields::default());
        let text = String::from_utf8(event.to_wire().unwrap()).unwrap();
        assert!(!text.contains("session_id"));
        assert!(!text.contains("null"));
    }
}
