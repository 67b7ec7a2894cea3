//! Protocol-pluggable device discovery.
//!
//! Each enabled protocol contributes a probe; a scan round runs every probe
//! under its own timeout, de-duplicates hits by `unique_id`, and notifies
//! registered observers. Observer callbacks are isolated: a panicking
//! observer is logged and skipped, it cannot poison the others.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use neuro_core::NeuroResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Transport a device was discovered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryProtocol {
    Serial,
    Bluetooth,
    Wifi,
    Usb,
    Lsl,
}

impl DiscoveryProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryProtocol::Serial => "serial",
            DiscoveryProtocol::Bluetooth => "bluetooth",
            DiscoveryProtocol::Wifi => "wifi",
            DiscoveryProtocol::Usb => "usb",
            DiscoveryProtocol::Lsl => "lsl",
        }
    }
}

/// One discovered device, identity-stable across scan rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub device_type: String,
    pub name: String,
    pub protocol: DiscoveryProtocol,
    /// Protocol-specific addressing (port, MAC, host, stream name).
    pub connection_info: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    /// `{device_type}_{stable key}`; the de-duplication key.
    pub unique_id: String,
}

impl DiscoveredDevice {
    pub fn new(
        device_type: impl Into<String>,
        name: impl Into<String>,
        protocol: DiscoveryProtocol,
        stable_key: &str,
    ) -> Self {
        let device_type = device_type.into();
        let unique_id = format!("{}_{}", device_type, stable_key);
        Self {
            device_type,
            name: name.into(),
            protocol,
            connection_info: BTreeMap::new(),
            metadata: BTreeMap::new(),
            unique_id,
        }
    }

    #[must_use]
    pub fn with_connection_info(mut self, key: &str, value: &str) -> Self {
        self.connection_info.insert(key.into(), value.into());
        self
    }
}

/// One transport's scan implementation.
#[async_trait]
pub trait ProtocolProbe: Send + Sync {
    fn protocol(&self) -> DiscoveryProtocol;

    /// Probe for devices. Implementations should return what they have
    /// found so far when the deadline passes.
    async fn scan(&self) -> NeuroResult<Vec<DiscoveredDevice>>;
}

type Observer = Box<dyn Fn(&DiscoveredDevice) + Send + Sync>;

/// Discovery registry: probes on one side, observers on the other.
pub struct DeviceScanner {
    probes: Vec<Box<dyn ProtocolProbe>>,
    observers: Mutex<Vec<Observer>>,
    seen: Mutex<BTreeSet<String>>,
    probe_timeout: Duration,
}

impl DeviceScanner {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            observers: Mutex::new(Vec::new()),
            seen: Mutex::new(BTreeSet::new()),
            probe_timeout,
        }
    }

    pub fn register_probe(&mut self, probe: Box<dyn ProtocolProbe>) {
        tracing::info!(protocol = probe.protocol().as_str(), "registered discovery probe");
        self.probes.push(probe);
    }

    /// Subscribe to de-duplicated discovery notifications.
    pub fn register_observer(&self, observer: impl Fn(&DiscoveredDevice) + Send + Sync + 'static) {
        self.observers.lock().push(Box::new(observer));
    }

    /// Forget previously seen devices so the next round re-notifies.
    pub fn reset_seen(&self) {
        self.seen.lock().clear();
    }

    /// Run one scan round across every registered probe.
    ///
    /// Probe failures and timeouts skip that protocol and keep the round
    /// going. Returns the new (not previously seen) devices.
    pub async fn scan_round(&self) -> Vec<DiscoveredDevice> {
        let mut fresh = Vec::new();
        for probe in &self.probes {
            let protocol = probe.protocol();
            let found = match tokio::time::timeout(self.probe_timeout, probe.scan()).await {
                Ok(Ok(found)) => found,
                Ok(Err(err)) => {
                    tracing::warn!(protocol = protocol.as_str(), %err, "probe failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(protocol = protocol.as_str(), "probe timed out");
                    continue;
                }
            };
            for device in found {
                let is_new = self.seen.lock().insert(device.unique_id.clone());
                if is_new {
                    self.notify(&device);
                    fresh.push(device);
                }
            }
        }
        fresh
    }

    fn notify(&self, device: &DiscoveredDevice) {
        let observers = self.observers.lock();
        for (i, observer) in observers.iter().enumerate() {
            // An observer that panics must not take down its peers.
            if catch_unwind(AssertUnwindSafe(|| observer(device))).is_err() {
                tracing::error!(
                    observer = i,
                    unique_id = %device.unique_id,
                    "discovery observer panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedProbe {
        protocol: DiscoveryProtocol,
        devices: Vec<DiscoveredDevice>,
    }

    #[async_trait]
    impl ProtocolProbe for FixedProbe {
        fn protocol(&self) -> DiscoveryProtocol {
            self.protocol
        }
        async fn scan(&self) -> NeuroResult<Vec<DiscoveredDevice>> {
            Ok(self.devices.clone())
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl ProtocolProbe for HangingProbe {
        fn protocol(&self) -> DiscoveryProtocol {
            DiscoveryProtocol::Bluetooth
        }
        async fn scan(&self) -> NeuroResult<Vec<DiscoveredDevice>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn headset(key: &str) -> DiscoveredDevice {
        DiscoveredDevice::new("synthetic", "Test Headset", DiscoveryProtocol::Serial, key)
            .with_connection_info("port", "/dev/ttyUSB0")
    }

    #[tokio::test]
    async fn scan_deduplicates_by_unique_id() {
        let mut scanner = DeviceScanner::new(Duration::from_millis(100));
        scanner.register_probe(Box::new(FixedProbe {
            protocol: DiscoveryProtocol::Serial,
            devices: vec![headset("A1"), headset("A1"), headset("B2")],
        }));

        let first = scanner.scan_round().await;
        assert_eq!(first.len(), 2);

        // Second round re-reports the same hardware; nothing is new.
        let second = scanner.scan_round().await;
        assert!(second.is_empty());

        scanner.reset_seen();
        assert_eq!(scanner.scan_round().await.len(), 2);
    }

    #[tokio::test]
    async fn hanging_probe_does_not_stall_the_round() {
        let mut scanner = DeviceScanner::new(Duration::from_millis(50));
        scanner.register_probe(Box::new(HangingProbe));
        scanner.register_probe(Box::new(FixedProbe {
            protocol: DiscoveryProtocol::Serial,
            devices: vec![headset("A1")],
        }));

        let found = scanner.scan_round().await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn panicking_observer_does_not_poison_others() {
        let mut scanner = DeviceScanner::new(Duration::from_millis(100));
        scanner.register_probe(Box::new(FixedProbe {
            protocol: DiscoveryProtocol::Serial,
            devices: vec![headset("A1")],
        }));

        scanner.register_observer(|_| panic!("bad observer"));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        scanner.register_observer(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        scanner.scan_round().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
