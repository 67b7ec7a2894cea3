//! Event processor: validation, signature gating, and parallel fan-out to
//! the three storage tiers.
//!
//! Each tier write is an independent best-effort operation with its own
//! bounded retry; one tier failing never aborts the others. Duplicates are
//! harmless because every tier is idempotent by `event_id`.

use std::sync::Arc;

use futures::StreamExt;
use neuro_core::metrics::{labels, MetricsSink};
use neuro_core::NeuroResult;
use parking_lot::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::event::LedgerEvent;
use crate::signer::EventSigner;
use crate::storage::{ColumnWarehouse, DocumentStore, RowStore};

/// Retry policy for tier writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 50,
        }
    }
}

/// Running counters, exposed for tests and health reporting.
#[derive(Debug, Clone, Default)]
pub struct ProcessorCounters {
    pub processed: u64,
    pub validation_failures: u64,
    pub signature_failures: u64,
    pub tier_failures: u64,
}

/// An event still owed to one tier after retries were exhausted.
#[derive(Debug, Clone)]
pub struct PendingRetry {
    pub tier: &'static str,
    pub event_id: String,
}

pub type ComplianceHook = Arc<dyn Fn(&LedgerEvent) + Send + Sync>;

/// Consumes serialized events and persists them across the storage tiers.
pub struct EventProcessor {
    row_store: Arc<dyn RowStore>,
    document_store: Arc<dyn DocumentStore>,
    warehouse: Arc<dyn ColumnWarehouse>,
    signer: EventSigner,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
    counters: Mutex<ProcessorCounters>,
    pending_retries: Mutex<Vec<PendingRetry>>,
    compliance_hook: Mutex<Option<ComplianceHook>>,
}

impl EventProcessor {
    pub fn new(
        row_store: Arc<dyn RowStore>,
        document_store: Arc<dyn DocumentStore>,
        warehouse: Arc<dyn ColumnWarehouse>,
        signer: EventSigner,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            row_store,
            document_store,
            warehouse,
            signer,
            metrics,
            retry,
            counters: Mutex::new(ProcessorCounters::default()),
            pending_retries: Mutex::new(Vec::new()),
            compliance_hook: Mutex::new(None),
        })
    }

    /// Install the compliance check hook fired for the compliance subset.
    pub fn set_compliance_hook(&self, hook: ComplianceHook) {
        *self.compliance_hook.lock() = Some(hook);
    }

    pub fn counters(&self) -> ProcessorCounters {
        self.counters.lock().clone()
    }

    /// Events owed to a tier after its retries ran out.
    pub fn pending_retries(&self) -> Vec<PendingRetry> {
        self.pending_retries.lock().clone()
    }

    /// Drive the processor from a transport subscription until it closes.
    pub fn spawn(self: Arc<Self>, mut stream: ReceiverStream<Vec<u8>>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                self.process_serialized(&payload).await;
            }
            tracing::info!("event stream closed, processor stopping");
        })
    }

    /// Process one serialized event. Returns true when the event was
    /// accepted (even if some tier writes are still owed).
    pub async fn process_serialized(&self, payload: &[u8]) -> bool {
        let started = std::time::Instant::now();

        // 1. Parse; malformed input is dropped with a counter.
        let event = match LedgerEvent::from_wire(payload) {
            Ok(event) => event,
            Err(err) => {
                self.counters.lock().validation_failures += 1;
                self.metrics
                    .record_counter("neuro.ledger.validation_failures", &labels([]), 1);
                tracing::error!(%err, "dropping unparseable event");
                return false;
            }
        };

        // 2. Validate required fields.
        if let Err(reason) = validate(&event) {
            self.counters.lock().validation_failures += 1;
            self.metrics
                .record_counter("neuro.ledger.validation_failures", &labels([]), 1);
            tracing::error!(event_id = %event.event_id, reason, "dropping invalid event");
            return false;
        }

        // 3. Signature gate: a critical event without a cryptographically
        // verifiable signature is rejected and never persisted.
        if event.event_type.requires_signature() && !self.signer.verify_event(&event) {
            self.counters.lock().signature_failures += 1;
            self.metrics.record_counter(
                "neuro.ledger.signature_failures",
                &labels([("event_type", event.event_type.as_str())]),
                1,
            );
            tracing::error!(
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                "rejecting critical event with missing or invalid signature"
            );
            return false;
        }

        // 4. Fan out to the three tiers concurrently; failures isolate.
        let (row, document, warehouse) = tokio::join!(
            self.write_tier("row_kv", &event, |e| {
                let store = Arc::clone(&self.row_store);
                async move { store.put(&e).await }
            }),
            self.write_tier("document", &event, |e| {
                let store = Arc::clone(&self.document_store);
                async move { store.put(&e).await }
            }),
            self.write_tier("warehouse", &event, |e| {
                let store = Arc::clone(&self.warehouse);
                async move { store.put(&e).await }
            }),
        );
        for (tier, ok) in [("row_kv", row), ("document", document), ("warehouse", warehouse)] {
            if !ok {
                self.counters.lock().tier_failures += 1;
                self.pending_retries.lock().push(PendingRetry {
                    tier,
                    event_id: event.event_id.clone(),
                });
            }
        }

        // 5. Metrics.
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_histogram(
            "neuro.ledger.processing_latency_ms",
            &labels([("event_type", event.event_type.as_str())]),
            latency_ms,
        );
        self.metrics.record_counter(
            "neuro.ledger.events_processed",
            &labels([("event_type", event.event_type.as_str())]),
            1,
        );
        self.counters.lock().processed += 1;

        // 6. Compliance hook.
        if event.event_type.is_compliance_event() {
            let hook = self.compliance_hook.lock().clone();
            if let Some(hook) = hook {
                hook(&event);
            }
        }

        tracing::debug!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            latency_ms,
            "processed event"
        );
        true
    }

    /// One tier write with bounded exponential backoff. Returns true on
    /// success.
    async fn write_tier<F, Fut>(&self, tier: &'static str, event: &LedgerEvent, op: F) -> bool
    where
        F: Fn(LedgerEvent) -> Fut,
        Fut: std::future::Future<Output = NeuroResult<()>>,
    {
        let mut delay_ms = self.retry.base_delay_ms;
        for attempt in 0..=self.retry.max_retries {
            match op(event.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(tier, event_id = %event.event_id, attempt, "tier write recovered");
                    }
                    return true;
                }
                Err(err) => {
                    self.metrics.record_counter(
                        "neuro.ledger.tier_write_errors",
                        &labels([("tier", tier)]),
                        1,
                    );
                    tracing::warn!(tier, event_id = %event.event_id, attempt, %err, "tier write failed");
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                        delay_ms = delay_ms.saturating_mul(2);
                    }
                }
            }
        }
        false
    }
}

fn validate(event: &LedgerEvent) -> Result<(), &'static str> {
    if event.event_id.is_empty() {
        return Err("missing event_id");
    }
    if event.event_hash.len() != 64 || !event.event_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("event_hash is not 64 hex characters");
    }
    if event.previous_hash.len() != 64
        || !event.previous_hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err("previous_hash is not 64 hex characters");
    }
    Ok(())
}
