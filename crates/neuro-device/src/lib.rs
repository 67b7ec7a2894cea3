//! Device ingestion fabric: the abstract device lifecycle, protocol-pluggable
//! discovery, the device manager, and a synthetic signal device for tests
//! and demos.

pub mod device;
pub mod discovery;
pub mod manager;
pub mod synthetic;

pub use device::{Device, DeviceCapabilities, StateCell};
pub use discovery::{DeviceScanner, DiscoveredDevice, DiscoveryProtocol, ProtocolProbe};
pub use manager::{AggregatedBatch, DeviceManager, DeviceManagerConfig};
pub use synthetic::{SignalProfile, SyntheticConfig, SyntheticDevice};
