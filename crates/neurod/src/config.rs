//! Layered daemon configuration: built-in defaults, then an optional TOML
//! file, then `NEURO_`-prefixed environment variables.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub id: String,
    pub channels: Vec<String>,
    pub sampling_rate_hz: f64,
    pub packet_interval_ms: u64,
    /// Generator profile: `resting_alpha`, `deep_sleep`, `motor_left`, or
    /// `spike_train`.
    pub profile: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: "synthetic-0".into(),
            channels: vec![
                "C3".into(),
                "C4".into(),
                "F3".into(),
                "F4".into(),
                "O1".into(),
                "O2".into(),
            ],
            sampling_rate_hz: 256.0,
            packet_interval_ms: 40,
            profile: "resting_alpha".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Ring-buffer span per stream. Sleep staging needs at least 30 s.
    pub buffer_ms: f64,
    pub cadence_ms: f64,
    /// Mains frequency for signal-quality checks, 50 or 60.
    pub line_freq_hz: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            buffer_ms: 31_000.0,
            cadence_ms: 100.0,
            line_freq_hz: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Bounded publish queue depth; back-pressure applies when full.
    pub queue_depth: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub keyring: String,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            max_retries: 5,
            retry_base_delay_ms: 50,
            keyring: "neurod/signing-key".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NeurodConfig {
    pub log_filter: LogFilter,
    pub device: DeviceSection,
    pub pipeline: PipelineSection,
    pub ledger: LedgerSection,
    pub aggregation_window_ms: AggregationWindow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogFilter(pub String);

impl Default for LogFilter {
    fn default() -> Self {
        Self("info".into())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AggregationWindow(pub u64);

impl Default for AggregationWindow {
    fn default() -> Self {
        Self(1000)
    }
}

impl NeurodConfig {
    /// Load configuration: defaults, then the optional file, then
    /// environment overrides (`NEURO_PIPELINE__CADENCE_MS=50`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let raw = builder
            .add_source(
                config::Environment::with_prefix("NEURO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut loaded: NeurodConfig = raw.try_deserialize()?;
        loaded.validate()?;

        // The environment/file layers override defaults field-wise; a fully
        // defaulted config is also valid.
        Ok(loaded)
    }

    fn validate(&mut self) -> anyhow::Result<()> {
        if self.pipeline.line_freq_hz != 50.0 && self.pipeline.line_freq_hz != 60.0 {
            anyhow::bail!(
                "pipeline.line_freq_hz must be 50 or 60, got {}",
                self.pipeline.line_freq_hz
            );
        }
        if self.device.channels.is_empty() {
            anyhow::bail!("device.channels cannot be empty");
        }
        if self.pipeline.cadence_ms <= 0.0 || self.pipeline.buffer_ms <= 0.0 {
            anyhow::bail!("pipeline timings must be positive");
        }
        Ok(())
    }
}
