//! Synthetic signal device.
//!
//! Generates band-limited EEG-like signals on a timer so the pipeline,
//! manager, and ledger can be exercised without hardware. Also the
//! reference implementation of the lifecycle contract: every concrete
//! device should sequence its states exactly like this one.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use neuro_core::quality::ImpedanceResult;
use neuro_core::types::{DeviceState, SamplePacket, SignalType};
use neuro_core::{DeviceError, DeviceErrorKind, NeuroResult};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;

use crate::device::{
    DataCallback, Device, DeviceCapabilities, ErrorCallback, StateCallback, StateCell,
};

/// What the generator produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalProfile {
    /// 10 Hz alpha on every channel; the relaxation scenario.
    RestingAlpha,
    /// 1 Hz high-amplitude slow waves, flat EMG; the N3 scenario.
    DeepSleep,
    /// Suppressed mu power on right-hemisphere channels; left-hand imagery.
    MotorImageryLeft,
    /// Periodic high-amplitude spikes on the first channel.
    SpikeTrain,
    /// A plain sine, for targeted tests.
    Tone { freq_hz: f64, amplitude: f64 },
}

/// Construction parameters for a synthetic device.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub id: String,
    pub channels: Vec<String>,
    pub sampling_rate_hz: f64,
    pub packet_interval_ms: u64,
    pub profile: SignalProfile,
    /// When set, `connect` fails into the `ERROR` state; for error-path
    /// tests.
    pub fail_connect: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            id: "synthetic-0".into(),
            channels: vec!["C3".into(), "C4".into(), "F3".into(), "F4".into()],
            sampling_rate_hz: 256.0,
            packet_interval_ms: 40,
            profile: SignalProfile::RestingAlpha,
            fail_connect: false,
        }
    }
}

struct Generator {
    profile: SignalProfile,
    sample_index: u64,
}

impl Generator {
    /// One packet worth of channel-major samples, phase-continuous across
    /// packets.
    fn generate(
        &mut self,
        channels: &[String],
        rate: f64,
        n_samples: usize,
    ) -> Vec<Vec<f32>> {
        let mut rng = rand::thread_rng();
        let start = self.sample_index;
        let data = channels
            .iter()
            .enumerate()
            .map(|(c, name)| {
                (0..n_samples)
                    .map(|i| {
                        let t = (start + i as u64) as f64 / rate;
                        let noise: f64 = rng.gen_range(-1.0..1.0);
                        (self.sample_at(c, name, t) + noise) as f32
                    })
                    .collect()
            })
            .collect();
        self.sample_index += n_samples as u64;
        data
    }

    fn sample_at(&self, channel: usize, name: &str, t: f64) -> f64 {
        let two_pi = 2.0 * std::f64::consts::PI;
        match self.profile {
            SignalProfile::RestingAlpha => 20.0 * (two_pi * 10.0 * t).sin(),
            SignalProfile::DeepSleep => {
                let upper = name.to_ascii_uppercase();
                if upper.contains("EMG") || upper.contains("CHIN") {
                    // Atonia: noise only.
                    0.0
                } else if upper.contains("EOG") {
                    2.0 * (two_pi * 0.4 * t).sin()
                } else {
                    100.0 * (two_pi * 1.0 * t).sin()
                }
            }
            SignalProfile::MotorImageryLeft => {
                let amplitude = if name.to_ascii_uppercase().contains('4') {
                    6.0 // Right hemisphere desynchronised.
                } else {
                    10.0
                };
                amplitude * (two_pi * 10.0 * t).sin()
            }
            SignalProfile::SpikeTrain => {
                let base = 10.0 * (two_pi * 5.0 * t).sin();
                if channel == 0 && (t % 0.5) < (1.0 / 512.0) {
                    base + 80.0
                } else {
                    base
                }
            }
            SignalProfile::Tone { freq_hz, amplitude } => amplitude * (two_pi * freq_hz * t).sin(),
        }
    }
}

/// Simulated acquisition device.
pub struct SyntheticDevice {
    id: String,
    config: Mutex<SyntheticConfig>,
    cell: Arc<StateCell>,
    data_callback: Arc<Mutex<Option<DataCallback>>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Arc<Self> {
        let cell = Arc::new(StateCell::new(config.id.clone()));
        Arc::new(Self {
            id: config.id.clone(),
            config: Mutex::new(config),
            cell,
            data_callback: Arc::new(Mutex::new(None)),
            stop_tx: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Device for SyntheticDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> DeviceState {
        self.cell.current()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            supported_sampling_rates: vec![128.0, 256.0, 512.0],
            max_channels: 32,
            signal_types: vec![SignalType::Eeg, SignalType::Eog, SignalType::Emg],
            has_impedance_check: true,
            has_battery: true,
        }
    }

    async fn connect(&self) -> NeuroResult<bool> {
        self.cell.transition(DeviceState::Connecting)?;
        // A real driver would probe hardware here.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        if self.config.lock().fail_connect {
            let err = DeviceError::new(
                &self.config.lock().id,
                DeviceErrorKind::Connection,
                "simulated connect failure",
            );
            self.cell.fail(err.clone());
            return Err(err.into());
        }

        self.cell.transition(DeviceState::Connected)?;
        Ok(true)
    }

    async fn disconnect(&self) -> NeuroResult<()> {
        if self.cell.current() == DeviceState::Streaming {
            self.stop_streaming().await?;
        }
        self.cell.transition(DeviceState::Disconnected)
    }

    async fn start_streaming(&self, session_id: &str) -> NeuroResult<()> {
        self.cell.require(DeviceState::Connected, "start_streaming")?;
        self.cell.transition(DeviceState::Streaming)?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let config = self.config.lock().clone();
        let data_callback = Arc::clone(&self.data_callback);
        let session_id = session_id.to_string();
        let n_samples =
            ((config.packet_interval_ms as f64 / 1000.0) * config.sampling_rate_hz) as usize;
        let n_samples = n_samples.max(1);

        tokio::spawn(async move {
            let mut generator = Generator {
                profile: config.profile,
                sample_index: 0,
            };
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
                config.packet_interval_ms,
            ));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }
                let data =
                    generator.generate(&config.channels, config.sampling_rate_hz, n_samples);
                let packet = match SamplePacket::new(
                    config.channels.clone(),
                    config.sampling_rate_hz,
                    data,
                    Utc::now(),
                    config.id.clone(),
                    session_id.clone(),
                    SignalType::Eeg,
                    "synthetic",
                ) {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::error!(%err, "synthetic generator produced a bad packet");
                        continue;
                    }
                };
                let callback = data_callback.lock().clone();
                if let Some(cb) = callback {
                    cb(packet);
                }
            }
            tracing::debug!(device_id = %config.id, "synthetic stream stopped");
        });

        Ok(())
    }

    async fn stop_streaming(&self) -> NeuroResult<()> {
        self.cell.require(DeviceState::Streaming, "stop_streaming")?;
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
        self.cell.transition(DeviceState::Connected)
    }

    async fn configure_channels(&self, channels: Vec<String>) -> NeuroResult<()> {
        if self.cell.current() == DeviceState::Streaming {
            return Err(DeviceError::new(
                &self.config.lock().id,
                DeviceErrorKind::Configuration,
                "cannot reconfigure channels while streaming",
            )
            .into());
        }
        if channels.is_empty() {
            return Err(DeviceError::new(
                &self.config.lock().id,
                DeviceErrorKind::Configuration,
                "channel list cannot be empty",
            )
            .into());
        }
        self.config.lock().channels = channels;
        Ok(())
    }

    async fn set_sampling_rate(&self, rate_hz: f64) -> NeuroResult<()> {
        if !self.capabilities().supported_sampling_rates.contains(&rate_hz) {
            return Err(DeviceError::new(
                &self.config.lock().id,
                DeviceErrorKind::Configuration,
                format!("unsupported sampling rate {} Hz", rate_hz),
            )
            .into());
        }
        self.config.lock().sampling_rate_hz = rate_hz;
        Ok(())
    }

    async fn check_impedance(&self) -> NeuroResult<BTreeMap<String, ImpedanceResult>> {
        self.cell.require(DeviceState::Connected, "check_impedance")?;
        let mut rng = rand::thread_rng();
        let config = self.config.lock();
        Ok(config
            .channels
            .iter()
            .map(|name| {
                let ohms = rng.gen_range(2_000.0..30_000.0);
                (name.clone(), neuro_dsp::quality::impedance_level(ohms))
            })
            .collect())
    }

    async fn battery_level(&self) -> Option<f64> {
        Some(0.87)
    }

    fn set_data_callback(&self, cb: DataCallback) {
        *self.data_callback.lock() = Some(cb);
    }

    fn set_state_callback(&self, cb: StateCallback) {
        self.cell.set_state_callback(cb);
    }

    fn set_error_callback(&self, cb: ErrorCallback) {
        self.cell.set_error_callback(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_lands_in_error_state() {
        let device = SyntheticDevice::new(SyntheticConfig {
            fail_connect: true,
            ..Default::default()
        });
        assert!(device.connect().await.is_err());
        assert_eq!(device.state(), DeviceState::Error);
        device.disconnect().await.unwrap();
        assert_eq!(device.state(), DeviceState::Disconnected);
    }

    #[tokio::test]
    async fn streaming_requires_connected() {
        let device = SyntheticDevice::new(SyntheticConfig::default());
        assert!(device.start_streaming("sess").await.is_err());
    }

    #[tokio::test]
    async fn reconfiguration_rejected_while_streaming() {
        let device = SyntheticDevice::new(SyntheticConfig::default());
        device.connect().await.unwrap();
        device.start_streaming("sess").await.unwrap();
        assert!(device
            .configure_channels(vec!["Cz".into()])
            .await
            .is_err());
        device.stop_streaming().await.unwrap();
        device.configure_channels(vec!["Cz".into()]).await.unwrap();
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn impedance_map_covers_all_channels() {
        let device = SyntheticDevice::new(SyntheticConfig::default());
        device.connect().await.unwrap();
        let impedances = device.check_impedance().await.unwrap();
        assert_eq!(impedances.len(), 4);
        for result in impedances.values() {
            assert!(result.impedance_ohms > 0.0);
        }
    }
}
