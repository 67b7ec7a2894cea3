//! Storage-tier contracts and in-memory reference implementations.
//!
//! Three independent views of the same canonical event JSON:
//!
//! - **Row-KV**: newest-first scans via reverse-timestamp keys, columns
//!   grouped into `event` / `metadata` / `chain` families.
//! - **Document**: one document per event plus a per-session projection.
//! - **Columnar warehouse**: flattened rows, day-partitioned on the event
//!   timestamp, the source for chain-state recovery and range queries.
//!
//! Every tier is idempotent by `event_id`; a duplicated write replaces the
//! same logical row. The in-memory stores support scripted failure
//! injection so independent-failure semantics can be tested.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use neuro_core::{NeuroError, NeuroResult};
use parking_lot::Mutex;

use crate::event::LedgerEvent;

/// All-nines base for reverse-timestamp keys (20 digits, micros form).
const REVERSE_BASE: u128 = 99_999_999_999_999_999_999;

/// Newest-first row key: `reverse_timestamp#event_id`.
pub fn row_key(event: &LedgerEvent) -> String {
    // %Y%m%d%H%M%S%f: 20 decimal digits.
    let stamp: u128 = event
        .timestamp
        .format("%Y%m%d%H%M%S%6f")
        .to_string()
        .parse()
        .unwrap_or(0);
    format!("{:020}#{}", REVERSE_BASE - stamp, event.event_id)
}

/// Day partition for warehouse rows.
pub fn day_partition(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}

/// Row-oriented KV tier.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn put(&self, event: &LedgerEvent) -> NeuroResult<()>;
}

/// Document tier with a per-session projection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, event: &LedgerEvent) -> NeuroResult<()>;
}

/// Columnar warehouse tier; also serves chain-state recovery and
/// verification queries.
#[async_trait]
pub trait ColumnWarehouse: Send + Sync {
    async fn put(&self, event: &LedgerEvent) -> NeuroResult<()>;

    /// Events in `[start, end]`, ascending by timestamp.
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> NeuroResult<Vec<LedgerEvent>>;

    /// `event_hash` of the newest stored row, for chain-state recovery.
    async fn latest_event_hash(&self) -> NeuroResult<Option<String>>;
}

/// Scripted failure switch shared by the in-memory stores.
#[derive(Default)]
struct FailureSwitch {
    /// Fail this many upcoming writes.
    fail_next: Mutex<u32>,
    /// Fail every write until cleared.
    always_fail: Mutex<bool>,
}

impl FailureSwitch {
    fn check(&self, tier: &str) -> NeuroResult<()> {
        if *self.always_fail.lock() {
            return Err(NeuroError::Storage {
                tier: tier.into(),
                message: "injected permanent failure".into(),
            });
        }
        let mut fail_next = self.fail_next.lock();
        if *fail_next > 0 {
            *fail_next -= 1;
            return Err(NeuroError::Storage {
                tier: tier.into(),
                message: "injected transient failure".into(),
            });
        }
        Ok(())
    }
}

/// One row-KV entry: column families as nested maps.
#[derive(Debug, Clone)]
pub struct RowEntry {
    pub families: BTreeMap<String, BTreeMap<String, String>>,
}

/// In-memory row-KV store.
#[derive(Default)]
pub struct MemoryRowStore {
    rows: Mutex<BTreeMap<String, RowEntry>>,
    failures: FailureSwitch,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        *self.failures.fail_next.lock() = n;
    }

    pub fn set_always_fail(&self, fail: bool) {
        *self.failures.always_fail.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest-first scan, the natural order of the reverse-timestamp keys.
    pub fn scan_newest(&self, limit: usize) -> Vec<(String, RowEntry)> {
        self.rows
            .lock()
            .iter()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.rows
            .lock()
            .keys()
            .any(|k| k.ends_with(&format!("#{}", event_id)))
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn put(&self, event: &LedgerEvent) -> NeuroResult<()> {
        self.failures.check("row_kv")?;

        let mut event_family = BTreeMap::new();
        event_family.insert("event_id".to_string(), event.event_id.clone());
        event_family.insert("event_type".to_string(), event.event_type.as_str().to_string());
        event_family.insert("timestamp".to_string(), event.timestamp_iso());
        if let Some(v) = &event.session_id {
            event_family.insert("session_id".to_string(), v.clone());
        }
        if let Some(v) = &event.device_id {
            event_family.insert("device_id".to_string(), v.clone());
        }
        if let Some(v) = &event.user_id {
            event_family.insert("user_id".to_string(), v.clone());
        }
        if let Some(v) = &event.data_hash {
            event_family.insert("data_hash".to_string(), v.clone());
        }

        let mut metadata_family = BTreeMap::new();
        if !event.metadata.is_empty() {
            metadata_family.insert(
                "data".to_string(),
                serde_json::to_string(&event.metadata)?,
            );
        }

        let mut chain_family = BTreeMap::new();
        chain_family.insert("previous_hash".to_string(), event.previous_hash.clone());
        chain_family.insert("event_hash".to_string(), event.event_hash.clone());
        if let Some(v) = &event.signature {
            chain_family.insert("signature".to_string(), v.clone());
        }
        if let Some(v) = &event.signing_key_id {
            chain_family.insert("signing_key_id".to_string(), v.clone());
        }

        let mut families = BTreeMap::new();
        families.insert("event".to_string(), event_family);
        families.insert("metadata".to_string(), metadata_family);
        families.insert("chain".to_string(), chain_family);

        // Idempotent by key: a replayed event overwrites its own row.
        self.rows.lock().insert(row_key(event), RowEntry { families });
        Ok(())
    }
}

/// In-memory document store with the per-session projection.
#[derive(Default)]
pub struct MemoryDocumentStore {
    events: Mutex<BTreeMap<String, serde_json::Value>>,
    sessions: Mutex<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
    failures: FailureSwitch,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        *self.failures.fail_next.lock() = n;
    }

    pub fn set_always_fail(&self, fail: bool) {
        *self.failures.always_fail.lock() = fail;
    }

    pub fn get(&self, event_id: &str) -> Option<serde_json::Value> {
        self.events.lock().get(event_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-session event projections, insertion keyed by event id.
    pub fn session_events(&self, session_id: &str) -> Vec<serde_json::Value> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, event: &LedgerEvent) -> NeuroResult<()> {
        self.failures.check("document")?;

        let document = serde_json::to_value(event)?;
        self.events
            .lock()
            .insert(event.event_id.clone(), document);

        if let Some(session_id) = &event.session_id {
            let projection = serde_json::json!({
                "event_id": event.event_id,
                "event_type": event.event_type.as_str(),
                "timestamp": event.timestamp_iso(),
                "event_hash": event.event_hash,
            });
            self.sessions
                .lock()
                .entry(session_id.clone())
                .or_default()
                .insert(event.event_id.clone(), projection);
        }
        Ok(())
    }
}

/// One flattened warehouse row; `metadata` is carried as a JSON string.
#[derive(Debug, Clone)]
pub struct WarehouseRow {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub data_hash: Option<String>,
    pub metadata_json: Option<String>,
    pub previous_hash: String,
    pub event_hash: String,
    pub signature: Option<String>,
    pub signing_key_id: Option<String>,
}

impl WarehouseRow {
    fn from_event(event: &LedgerEvent) -> NeuroResult<Self> {
        let metadata_json = if event.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.metadata)?)
        };
        Ok(Self {
            event_id: event.event_id.clone(),
            timestamp: event.timestamp,
            event_type: event.event_type.as_str().to_string(),
            session_id: event.session_id.clone(),
            device_id: event.device_id.clone(),
            user_id: event.user_id.clone(),
            data_hash: event.data_hash.clone(),
            metadata_json,
            previous_hash: event.previous_hash.clone(),
            event_hash: event.event_hash.clone(),
            signature: event.signature.clone(),
            signing_key_id: event.signing_key_id.clone(),
        })
    }

    fn into_event(self) -> NeuroResult<LedgerEvent> {
        let event_type: crate::event::EventType =
            serde_json::from_value(serde_json::Value::String(self.event_type))?;
        let metadata = match self.metadata_json {
            Some(json) => serde_json::from_str(&json)?,
            None => BTreeMap::new(),
        };
        Ok(LedgerEvent {
            event_id: self.event_id,
            timestamp: self.timestamp,
            event_type,
            session_id: self.session_id,
            device_id: self.device_id,
            user_id: self.user_id,
            data_hash: self.data_hash,
            metadata,
            previous_hash: self.previous_hash,
            event_hash: self.event_hash,
            signature: self.signature,
            signing_key_id: self.signing_key_id,
        })
    }
}

/// In-memory columnar warehouse with day partitions.
#[derive(Default)]
pub struct MemoryWarehouse {
    partitions: Mutex<BTreeMap<NaiveDate, BTreeMap<String, WarehouseRow>>>,
    failures: FailureSwitch,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        *self.failures.fail_next.lock() = n;
    }

    pub fn set_always_fail(&self, fail: bool) {
        *self.failures.always_fail.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.partitions.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.lock().len()
    }

    fn all_sorted(&self) -> Vec<WarehouseRow> {
        let mut rows: Vec<WarehouseRow> = self
            .partitions
            .lock()
            .values()
            .flat_map(|p| p.values().cloned())
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        rows
    }
}

#[async_trait]
impl ColumnWarehouse for MemoryWarehouse {
    async fn put(&self, event: &LedgerEvent) -> NeuroResult<()> {
        self.failures.check("warehouse")?;
        let row = WarehouseRow::from_event(event)?;
        self.partitions
            .lock()
            .entry(day_partition(event.timestamp))
            .or_default()
            .insert(event.event_id.clone(), row);
        Ok(())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> NeuroResult<Vec<LedgerEvent>> {
        self.all_sorted()
            .into_iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .map(WarehouseRow::into_event)
            .collect()
    }

    async fn latest_event_hash(&self) -> NeuroResult<Option<String>> {
        Ok(self.all_sorted().last().map(|r| r.event_hash.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, LogFields, GENESIS_HASH};
    use crate::hash_chain::compute_event_hash;
    use chrono::Duration;

    fn event_at(offset_secs: i64, session: Option<&str>) -> LedgerEvent {
        let mut fields = LogFields::default().meta("seq", serde_json::json!(offset_secs));
        if let Some(s) = session {
            fields = fields.session(s);
        }
        let mut event = LedgerEvent::new(EventType::DataIngested, fields);
        event.timestamp = Utc::now() + Duration::seconds(offset_secs);
        event.event_hash = compute_event_hash(&event, GENESIS_HASH);
        event
    }

    #[tokio::test]
    async fn row_keys_scan_newest_first() {
        let store = MemoryRowStore::new();
        for i in 0..5 {
            store.put(&event_at(i * 60, None)).await.unwrap();
        }
        let rows = store.scan_newest(5);
        assert_eq!(rows.len(), 5);
        let timestamps: Vec<String> = rows
            .iter()
            .map(|(_, r)| r.families["event"]["timestamp"].clone())
            .collect();
        let mut sorted = timestamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(timestamps, sorted, "newest first");
    }

    #[tokio::test]
    async fn row_store_groups_column_families() {
        let store = MemoryRowStore::new();
        let event = event_at(0, Some("sess-1"));
        store.put(&event).await.unwrap();

        let (_, row) = store.scan_newest(1).pop().unwrap();
        assert!(row.families["event"].contains_key("session_id"));
        assert!(row.families["chain"].contains_key("previous_hash"));
        assert!(row.families["metadata"].contains_key("data"));
    }

    #[tokio::test]
    async fn duplicate_put_is_idempotent() {
        let store = MemoryRowStore::new();
        let event = event_at(0, None);
        store.put(&event).await.unwrap();
        store.put(&event).await.unwrap();
        assert_eq!(store.len(), 1);

        let docs = MemoryDocumentStore::new();
        docs.put(&event).await.unwrap();
        docs.put(&event).await.unwrap();
        assert_eq!(docs.len(), 1);

        let warehouse = MemoryWarehouse::new();
        warehouse.put(&event).await.unwrap();
        warehouse.put(&event).await.unwrap();
        assert_eq!(warehouse.len(), 1);
    }

    #[tokio::test]
    async fn document_store_projects_session_events() {
        let store = MemoryDocumentStore::new();
        store.put(&event_at(0, Some("sess-1"))).await.unwrap();
        store.put(&event_at(1, Some("sess-1"))).await.unwrap();
        store.put(&event_at(2, Some("sess-2"))).await.unwrap();
        store.put(&event_at(3, None)).await.unwrap();

        assert_eq!(store.len(), 4);
        assert_eq!(store.session_events("sess-1").len(), 2);
        assert_eq!(store.session_events("sess-2").len(), 1);
        assert!(store.session_events("sess-3").is_empty());

        let projection = &store.session_events("sess-1")[0];
        assert!(projection.get("event_hash").is_some());
        assert!(projection.get("metadata").is_none(), "projection is slim");
    }

    #[tokio::test]
    async fn warehouse_partitions_by_day_and_queries_in_order() {
        let warehouse = MemoryWarehouse::new();
        let mut yesterday = event_at(0, None);
        yesterday.timestamp = Utc::now() - Duration::days(1);
        warehouse.put(&yesterday).await.unwrap();
        warehouse.put(&event_at(10, None)).await.unwrap();
        warehouse.put(&event_at(5, None)).await.unwrap();

        assert_eq!(warehouse.partition_count(), 2);

        let events = warehouse
            .query_range(Utc::now() - Duration::days(2), Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let latest = warehouse.latest_event_hash().await.unwrap().unwrap();
        assert_eq!(latest, events.last().unwrap().event_hash);
    }

    #[tokio::test]
    async fn failure_injection_is_scoped() {
        let store = MemoryRowStore::new();
        store.fail_next(1);
        assert!(store.put(&event_at(0, None)).await.is_err());
        assert!(store.put(&event_at(1, None)).await.is_ok());

        store.set_always_fail(true);
        assert!(store.put(&event_at(2, None)).await.is_err());
        assert!(store.put(&event_at(3, None)).await.is_err());
        store.set_always_fail(false);
        assert!(store.put(&event_at(4, None)).await.is_ok());
    }
}
