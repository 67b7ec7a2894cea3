//! Ledger facade: chain-state custodian and event publisher.
//!
//! Owns the `last_event_hash` cursor. Hash assignment, signing, enqueue,
//! and the cursor swap happen inside one async critical section, so the
//! publish order is exactly the `previous_hash` chain order. Chain state is
//! recovered from the warehouse once at startup, before any `log_event`
//! call is accepted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use neuro_core::metrics::{labels, MetricsSink};
use neuro_core::NeuroResult;

use crate::event::{EventType, LedgerEvent, LogFields, GENESIS_HASH};
use crate::hash_chain::{self, ChainVerification};
use crate::signer::EventSigner;
use crate::storage::ColumnWarehouse;
use crate::transport::EventTransport;

/// Topic the facade publishes serialized events to.
pub const LEDGER_TOPIC: &str = "ledger-events";

/// Append-only audit ledger entry point.
pub struct Ledger {
    transport: Arc<dyn EventTransport>,
    warehouse: Arc<dyn ColumnWarehouse>,
    signer: EventSigner,
    metrics: Arc<dyn MetricsSink>,
    /// Chain cursor; the lock spans hash assignment, enqueue, and swap.
    last_event_hash: tokio::sync::Mutex<String>,
}

impl Ledger {
    /// Build the facade, recovering chain state from the warehouse.
    pub async fn init(
        transport: Arc<dyn EventTransport>,
        warehouse: Arc<dyn ColumnWarehouse>,
        signer: EventSigner,
        metrics: Arc<dyn MetricsSink>,
    ) -> NeuroResult<Self> {
        let last_event_hash = match warehouse.latest_event_hash().await? {
            Some(hash) => {
                tracing::info!(last_hash = %&hash[..8.min(hash.len())], "recovered chain state");
                hash
            }
            None => {
                tracing::info!("no stored events, starting at genesis");
                GENESIS_HASH.to_string()
            }
        };
        Ok(Self {
            transport,
            warehouse,
            signer,
            metrics,
            last_event_hash: tokio::sync::Mutex::new(last_event_hash),
        })
    }

    /// Append one event: chain it, sign it when critical, publish it, and
    /// advance the cursor. The cursor only advances after a successful
    /// enqueue.
    pub async fn log_event(
        &self,
        event_type: EventType,
        fields: LogFields,
    ) -> NeuroResult<LedgerEvent> {
        let mut cursor = self.last_event_hash.lock().await;

        let mut event = LedgerEvent::new(event_type, fields);
        event.previous_hash = cursor.clone();
        event.event_hash = hash_chain::compute_event_hash(&event, &event.previous_hash);

        if event_type.requires_signature() {
            self.signer.sign_event(&mut event)?;
        }

        let payload = event.to_wire()?;
        self.transport.publish(LEDGER_TOPIC, payload).await?;

        *cursor = event.event_hash.clone();
        drop(cursor);

        self.metrics.record_counter(
            "neuro.ledger.events_logged",
            &labels([("event_type", event_type.as_str())]),
            1,
        );
        tracing::info!(
            event_type = event_type.as_str(),
            event_id = %event.event_id,
            hash = %&event.event_hash[..8],
            "logged event"
        );
        Ok(event)
    }

    /// Current cursor value, mainly for tests and health reporting.
    pub async fn last_event_hash(&self) -> String {
        self.last_event_hash.lock().await.clone()
    }

    // === Convenience wrappers with the standard metadata enrichment ===

    pub async fn log_session_created(
        &self,
        session_id: &str,
        user_id: &str,
        device_id: &str,
    ) -> NeuroResult<LedgerEvent> {
        self.log_event(
            EventType::SessionCreated,
            LogFields::default()
                .session(session_id)
                .user(user_id)
                .device(device_id)
                .meta("session_version", serde_json::json!("1.0"))
                .meta("protocol", serde_json::json!("realtime")),
        )
        .await
    }

    pub async fn log_data_ingested(
        &self,
        session_id: &str,
        data_hash: &str,
        size_bytes: usize,
    ) -> NeuroResult<LedgerEvent> {
        self.log_event(
            EventType::DataIngested,
            LogFields::default()
                .session(session_id)
                .data_hash(data_hash)
                .meta("data_size_bytes", serde_json::json!(size_bytes)),
        )
        .await
    }

    pub async fn log_device_connected(
        &self,
        device_id: &str,
        device_type: &str,
    ) -> NeuroResult<LedgerEvent> {
        self.log_event(
            EventType::DeviceConnected,
            LogFields::default()
                .device(device_id)
                .meta("device_type", serde_json::json!(device_type)),
        )
        .await
    }

    pub async fn log_access_event(
        &self,
        user_id: &str,
        granted: bool,
        resource: &str,
    ) -> NeuroResult<LedgerEvent> {
        let event_type = if granted {
            EventType::AccessGranted
        } else {
            EventType::AccessDenied
        };
        self.log_event(
            event_type,
            LogFields::default()
                .user(user_id)
                .meta("resource", serde_json::json!(resource)),
        )
        .await
    }

    /// Verify the stored chain over a time range.
    ///
    /// The range start must align with the chain genesis (or the verifier
    /// will report a break at index 0 by construction): verification always
    /// walks from the genesis hash.
    pub async fn verify_chain_integrity(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> NeuroResult<ChainVerification> {
        let events = self.warehouse.query_range(start, end).await?;
        let verification = hash_chain::verify_chain(&events);
        if !verification.valid {
            self.metrics
                .record_counter("neuro.ledger.chain_violations", &labels([]), 1);
            tracing::error!(
                first_break = ?verification.first_break,
                range_start = %start,
                range_end = %end,
                "chain integrity violation detected"
            );
        }
        Ok(verification)
    }
}
