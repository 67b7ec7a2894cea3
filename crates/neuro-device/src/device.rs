//! Abstract device lifecycle.
//!
//! A device moves through `DISCONNECTED -> CONNECTING -> CONNECTED ->
//! STREAMING` and back; `ERROR` is absorbing from every state and only
//! `disconnect` leaves it. All transitions funnel through [`StateCell`],
//! which rejects illegal edges and fires the state callback exactly once
//! per edge.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use neuro_core::quality::ImpedanceResult;
use neuro_core::types::{DeviceState, SamplePacket, SignalType};
use neuro_core::{DeviceError, DeviceErrorKind, NeuroResult};
use parking_lot::Mutex;

/// Callback receiving sample packets while streaming.
pub type DataCallback = Arc<dyn Fn(SamplePacket) + Send + Sync>;
/// Callback fired once per state-machine edge.
pub type StateCallback = Arc<dyn Fn(DeviceState) + Send + Sync>;
/// Callback fired when the device fails into `ERROR`.
pub type ErrorCallback = Arc<dyn Fn(DeviceError) + Send + Sync>;

/// Static capabilities a device advertises after connecting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceCapabilities {
    pub supported_sampling_rates: Vec<f64>,
    pub max_channels: usize,
    pub signal_types: Vec<SignalType>,
    pub has_impedance_check: bool,
    pub has_battery: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            supported_sampling_rates: vec![256.0],
            max_channels: 8,
            signal_types: vec![SignalType::Eeg],
            has_impedance_check: false,
            has_battery: false,
        }
    }
}

/// Shared lifecycle state with callback dispatch.
///
/// Devices embed one of these; every state change goes through
/// [`StateCell::transition`], which enforces the legal edges of
/// [`DeviceState::can_transition_to`].
pub struct StateCell {
    device_id: String,
    state: Mutex<DeviceState>,
    on_state: Mutex<Option<StateCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl StateCell {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: Mutex::new(DeviceState::Disconnected),
            on_state: Mutex::new(None),
            on_error: Mutex::new(None),
        }
    }

    pub fn current(&self) -> DeviceState {
        *self.state.lock()
    }

    pub fn set_state_callback(&self, cb: StateCallback) {
        *self.on_state.lock() = Some(cb);
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        *self.on_error.lock() = Some(cb);
    }

    /// Attempt a transition; on success the state callback fires once.
    pub fn transition(&self, next: DeviceState) -> NeuroResult<()> {
        let callback = {
            let mut state = self.state.lock();
            if *state == next {
                return Ok(());
            }
            if !state.can_transition_to(next) {
                return Err(DeviceError::new(
                    &self.device_id,
                    DeviceErrorKind::InvalidTransition,
                    format!("{} -> {}", state.as_str(), next.as_str()),
                )
                .into());
            }
            tracing::debug!(
                device_id = %self.device_id,
                from = state.as_str(),
                to = next.as_str(),
                "device state transition"
            );
            *state = next;
            self.on_state.lock().clone()
        };
        if let Some(cb) = callback {
            cb(next);
        }
        Ok(())
    }

    /// Fail into the absorbing `ERROR` state and notify the error callback.
    pub fn fail(&self, error: DeviceError) {
        let _ = self.transition(DeviceState::Error);
        tracing::error!(device_id = %self.device_id, %error, "device failed");
        let callback = self.on_error.lock().clone();
        if let Some(cb) = callback {
            cb(error);
        }
    }

    /// Guard: the current state must be `expected` for the operation.
    pub fn require(&self, expected: DeviceState, operation: &str) -> NeuroResult<()> {
        let current = self.current();
        if current != expected {
            return Err(DeviceError::new(
                &self.device_id,
                DeviceErrorKind::InvalidTransition,
                format!(
                    "{} requires state {}, currently {}",
                    operation,
                    expected.as_str(),
                    current.as_str()
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// The device abstraction every concrete acquisition source implements.
///
/// Long-running operations are async; synchronous accessors expose identity,
/// state, and capabilities. Impedance and battery support are optional and
/// default to an unsupported error / `None`.
#[async_trait]
pub trait Device: Send + Sync {
    fn id(&self) -> &str;

    fn state(&self) -> DeviceState;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Establish the connection. Returns `true` when the device is ready.
    async fn connect(&self) -> NeuroResult<bool>;

    /// Tear down the connection from any state, including `ERROR`.
    async fn disconnect(&self) -> NeuroResult<()>;

    /// Begin emitting packets tagged with `session_id`. Requires
    /// `CONNECTED`.
    async fn start_streaming(&self, session_id: &str) -> NeuroResult<()>;

    /// Stop emitting packets; returns to `CONNECTED`.
    async fn stop_streaming(&self) -> NeuroResult<()>;

    async fn configure_channels(&self, channels: Vec<String>) -> NeuroResult<()>;

    async fn set_sampling_rate(&self, rate_hz: f64) -> NeuroResult<()>;

    /// Per-channel electrode impedance, when the hardware supports it.
    async fn check_impedance(&self) -> NeuroResult<BTreeMap<String, ImpedanceResult>> {
        Err(DeviceError::new(
            self.id(),
            DeviceErrorKind::NotSupported,
            "impedance check not supported",
        )
        .into())
    }

    /// Battery charge in 0..=1, when the hardware reports it.
    async fn battery_level(&self) -> Option<f64> {
        None
    }

    fn set_data_callback(&self, cb: DataCallback);

    fn set_state_callback(&self, cb: StateCallback);

    fn set_error_callback(&self, cb: ErrorCallback);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transition_fires_callback_once_per_edge() {
        let cell = StateCell::new("dev-0");
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        cell.set_state_callback(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        cell.transition(DeviceState::Connecting).unwrap();
        cell.transition(DeviceState::Connected).unwrap();
        // Same-state transition is a no-op without a callback.
        cell.transition(DeviceState::Connected).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn illegal_edge_is_rejected() {
        let cell = StateCell::new("dev-0");
        assert!(cell.transition(DeviceState::Streaming).is_err());
        assert_eq!(cell.current(), DeviceState::Disconnected);
    }

    #[test]
    fn error_is_absorbing_until_disconnect() {
        let cell = StateCell::new("dev-0");
        cell.transition(DeviceState::Connecting).unwrap();
        cell.fail(DeviceError::new(
            "dev-0",
            DeviceErrorKind::Connection,
            "probe lost",
        ));
        assert_eq!(cell.current(), DeviceState::Error);
        assert!(cell.transition(DeviceState::Connected).is_err());
        cell.transition(DeviceState::Disconnected).unwrap();
        assert_eq!(cell.current(), DeviceState::Disconnected);
    }
}
