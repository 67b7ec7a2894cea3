//! Device registry and session orchestration.
//!
//! The manager owns the device registry, the active session identity, a
//! packet fan-in channel for the processing pipeline, and a time-windowed
//! aggregator whose batches feed per-session data hashing in the audit
//! ledger. Auto-discovery maps discovered device types to builders through
//! a stable table.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use neuro_core::types::SamplePacket;
use neuro_core::{DeviceError, DeviceErrorKind, NeuroResult};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::device::Device;
use crate::discovery::DiscoveredDevice;

/// Packets that arrived within one aggregation window.
#[derive(Debug, Clone)]
pub struct AggregatedBatch {
    pub session_id: String,
    pub window_start: DateTime<Utc>,
    pub packets: Vec<SamplePacket>,
}

impl AggregatedBatch {
    /// Total payload bytes across the batch, for `data.ingested` metadata.
    pub fn payload_bytes(&self) -> usize {
        self.packets
            .iter()
            .map(|p| p.data().iter().map(|row| row.len() * 4).sum::<usize>())
            .sum()
    }
}

pub type BatchCallback = Arc<dyn Fn(AggregatedBatch) + Send + Sync>;
type DeviceBuilder = Box<dyn Fn(&DiscoveredDevice) -> Arc<dyn Device> + Send + Sync>;

/// Configuration for the device manager.
#[derive(Debug, Clone)]
pub struct DeviceManagerConfig {
    /// Aggregation window for batched data callbacks, milliseconds.
    pub aggregation_window_ms: u64,
    /// Capacity of the packet fan-in channel.
    pub packet_channel_capacity: usize,
}

impl Default for DeviceManagerConfig {
    fn default() -> Self {
        Self {
            aggregation_window_ms: 1000,
            packet_channel_capacity: 256,
        }
    }
}

/// Registry of devices with session identity and data aggregation.
pub struct DeviceManager {
    config: DeviceManagerConfig,
    devices: RwLock<BTreeMap<String, Arc<dyn Device>>>,
    active_session: Mutex<Option<String>>,
    pending: Arc<Mutex<Vec<SamplePacket>>>,
    packet_tx: Mutex<Option<mpsc::Sender<SamplePacket>>>,
    batch_callback: Arc<Mutex<Option<BatchCallback>>>,
    aggregation_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    builders: Mutex<BTreeMap<String, DeviceBuilder>>,
    dropped_packets: Arc<Mutex<u64>>,
}

impl DeviceManager {
    pub fn new(config: DeviceManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            devices: RwLock::new(BTreeMap::new()),
            active_session: Mutex::new(None),
            pending: Arc::new(Mutex::new(Vec::new())),
            packet_tx: Mutex::new(None),
            batch_callback: Arc::new(Mutex::new(None)),
            aggregation_task: Mutex::new(None),
            builders: Mutex::new(BTreeMap::new()),
            dropped_packets: Arc::new(Mutex::new(0)),
        })
    }

    /// Register a device and hook its data feed into the manager.
    pub fn register_device(self: &Arc<Self>, device: Arc<dyn Device>) {
        let id = device.id().to_string();
        let manager = Arc::downgrade(self);
        device.set_data_callback(Arc::new(move |packet| {
            if let Some(manager) = manager.upgrade() {
                manager.ingest(packet);
            }
        }));
        tracing::info!(device_id = %id, "registered device");
        self.devices.write().insert(id, device);
    }

    pub fn device(&self, id: &str) -> Option<Arc<dyn Device>> {
        self.devices.read().get(id).cloned()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    pub fn device_states(&self) -> BTreeMap<String, neuro_core::types::DeviceState> {
        self.devices
            .read()
            .iter()
            .map(|(id, d)| (id.clone(), d.state()))
            .collect()
    }

    fn ingest(&self, packet: SamplePacket) {
        self.pending.lock().push(packet.clone());
        if let Some(tx) = self.packet_tx.lock().as_ref() {
            if tx.try_send(packet).is_err() {
                // Back-pressure: the pipeline is behind, drop and count.
                *self.dropped_packets.lock() += 1;
            }
        }
    }

    pub fn dropped_packets(&self) -> u64 {
        *self.dropped_packets.lock()
    }

    /// Create the packet fan-in stream for the processing pipeline.
    /// Subsequent calls replace the previous stream.
    pub fn packet_stream(&self) -> ReceiverStream<SamplePacket> {
        let (tx, rx) = mpsc::channel(self.config.packet_channel_capacity);
        *self.packet_tx.lock() = Some(tx);
        ReceiverStream::new(rx)
    }

    // === Session identity ===

    /// Set the externally assigned session id; required before streaming.
    pub fn set_session(&self, session_id: impl Into<String>) {
        *self.active_session.lock() = Some(session_id.into());
    }

    pub fn clear_session(&self) {
        *self.active_session.lock() = None;
    }

    pub fn active_session(&self) -> Option<String> {
        self.active_session.lock().clone()
    }

    // === Device operations ===

    pub async fn connect_device(&self, id: &str) -> NeuroResult<()> {
        let device = self.device(id).ok_or_else(|| unknown_device(id))?;
        device.connect().await?;
        Ok(())
    }

    pub async fn disconnect_device(&self, id: &str) -> NeuroResult<()> {
        let device = self.device(id).ok_or_else(|| unknown_device(id))?;
        device.disconnect().await
    }

    /// Start streaming on the named devices, or on every connected device
    /// when `ids` is `None`. Requires an active session.
    pub async fn start_streaming(&self, ids: Option<&[String]>) -> NeuroResult<()> {
        let session = self.active_session().ok_or_else(|| {
            neuro_core::NeuroError::Config("no active session; call set_session first".into())
        })?;

        let targets: Vec<Arc<dyn Device>> = match ids {
            Some(ids) => ids
                .iter()
                .map(|id| self.device(id).ok_or_else(|| unknown_device(id)))
                .collect::<NeuroResult<_>>()?,
            None => self.devices.read().values().cloned().collect(),
        };

        for device in targets {
            device.start_streaming(&session).await?;
        }
        Ok(())
    }

    /// Stop streaming on every device currently in the streaming state.
    pub async fn stop_streaming(&self) -> NeuroResult<()> {
        let devices: Vec<Arc<dyn Device>> = self.devices.read().values().cloned().collect();
        for device in devices {
            if device.state() == neuro_core::types::DeviceState::Streaming {
                device.stop_streaming().await?;
            }
        }
        Ok(())
    }

    // === Aggregation ===

    /// Start delivering batched packets every aggregation window. Batches
    /// are only delivered while a session is active.
    pub fn start_aggregation(self: &Arc<Self>, callback: BatchCallback) {
        *self.batch_callback.lock() = Some(callback);

        let manager = Arc::downgrade(self);
        let window = std::time::Duration::from_millis(self.config.aggregation_window_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            ticker.tick().await; // First tick fires immediately; skip it.
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.flush_window();
            }
        });

        if let Some(old) = self.aggregation_task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop_aggregation(&self) {
        if let Some(task) = self.aggregation_task.lock().take() {
            task.abort();
        }
        self.flush_window();
    }

    fn flush_window(&self) {
        let packets: Vec<SamplePacket> = std::mem::take(&mut *self.pending.lock());
        if packets.is_empty() {
            return;
        }
        let Some(session_id) = self.active_session() else {
            return;
        };
        let window_start = packets
            .iter()
            .map(|p| p.timestamp())
            .min()
            .unwrap_or_else(Utc::now);
        let callback = self.batch_callback.lock().clone();
        if let Some(cb) = callback {
            cb(AggregatedBatch {
                session_id,
                window_start,
                packets,
            });
        }
    }

    // === Auto-discovery ===

    /// Install a builder for a discovered device type. The mapping table is
    /// the stable subset: anything without a builder stays discovery-only.
    pub fn register_builder(
        &self,
        device_type: impl Into<String>,
        builder: impl Fn(&DiscoveredDevice) -> Arc<dyn Device> + Send + Sync + 'static,
    ) {
        self.builders
            .lock()
            .insert(device_type.into(), Box::new(builder));
    }

    /// Run one discovery round and instantiate every newly found device
    /// that has a builder in the mapping table.
    pub async fn auto_discover(
        self: &Arc<Self>,
        scanner: &crate::discovery::DeviceScanner,
    ) -> Vec<Arc<dyn Device>> {
        let found = scanner.scan_round().await;
        found
            .iter()
            .filter_map(|d| self.instantiate_discovered(d))
            .collect()
    }

    /// Instantiate and register a discovered device, when a builder for its
    /// type exists.
    pub fn instantiate_discovered(
        self: &Arc<Self>,
        discovered: &DiscoveredDevice,
    ) -> Option<Arc<dyn Device>> {
        let device = {
            let builders = self.builders.lock();
            let builder = builders.get(&discovered.device_type)?;
            builder(discovered)
        };
        self.register_device(Arc::clone(&device));
        tracing::info!(
            unique_id = %discovered.unique_id,
            device_type = %discovered.device_type,
            "instantiated discovered device"
        );
        Some(device)
    }
}

fn unknown_device(id: &str) -> neuro_core::NeuroError {
    DeviceError::new(id, DeviceErrorKind::Configuration, "unknown device id").into()
}
