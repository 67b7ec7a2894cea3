//! Per-stream circular sample storage with time-based window extraction.
//!
//! The buffer holds a fixed `(channels x capacity)` matrix plus a parallel
//! timestamp array. Producers append packets, consumers extract the most
//! recent window of a requested duration. A single lock serialises both
//! directions; every operation is O(n) in the sample count and far below the
//! classification cadence.
//!
//! # Thread safety
//!
//! Single producer, multiple consumers. Consumers only read; the internal
//! `parking_lot::Mutex` protects the write position, the sample counter, and
//! the data/timestamp arrays together so readers never observe a torn write.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::{NeuroError, NeuroResult};
use crate::types::{SamplePacket, Window};

struct BufferInner {
    /// Channel-major sample storage, `data[c][i]`.
    data: Vec<Vec<f32>>,
    /// Per-sample wall-clock timestamps, seconds since the UNIX epoch.
    timestamps: Vec<f64>,
    /// Next write index, always in `[0, capacity)`.
    write_pos: usize,
    /// Total samples ever written; monotonic, never wraps.
    samples_written: u64,
    /// Channel names captured from the first packet.
    channel_names: Option<Vec<String>>,
    device_id: Option<String>,
}

/// Fixed-capacity ring buffer for one device stream.
pub struct RingBuffer {
    channels: usize,
    capacity: usize,
    sampling_rate_hz: f64,
    inner: Mutex<BufferInner>,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RingBuffer")
            .field("channels", &self.channels)
            .field("capacity", &self.capacity)
            .field("sampling_rate_hz", &self.sampling_rate_hz)
            .field("write_pos", &inner.write_pos)
            .field("samples_written", &inner.samples_written)
            .finish()
    }
}

impl RingBuffer {
    /// Create a buffer spanning `duration_ms` of signal at `sampling_rate_hz`.
    pub fn new(channels: usize, duration_ms: f64, sampling_rate_hz: f64) -> NeuroResult<Self> {
        if channels == 0 {
            return Err(NeuroError::Buffer("buffer needs at least one channel".into()));
        }
        if !sampling_rate_hz.is_finite() || sampling_rate_hz <= 0.0 {
            return Err(NeuroError::Buffer(format!(
                "sampling rate {} Hz is not usable",
                sampling_rate_hz
            )));
        }
        let capacity = ((duration_ms / 1000.0) * sampling_rate_hz) as usize;
        if capacity == 0 {
            return Err(NeuroError::Buffer(format!(
                "duration {} ms holds no samples at {} Hz",
                duration_ms, sampling_rate_hz
            )));
        }
        Ok(Self {
            channels,
            capacity,
            sampling_rate_hz,
            inner: Mutex::new(BufferInner {
                data: vec![vec![0.0; capacity]; channels],
                timestamps: vec![0.0; capacity],
                write_pos: 0,
                samples_written: 0,
                channel_names: None,
                device_id: None,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    /// Append one packet. Wraparound writes are split into two spans.
    pub fn add(&self, packet: &SamplePacket) -> NeuroResult<()> {
        if packet.data().len() != self.channels {
            return Err(NeuroError::Buffer(format!(
                "packet has {} channels, buffer expects {}",
                packet.data().len(),
                self.channels
            )));
        }
        let n = packet.n_samples();

        let mut inner = self.inner.lock();
        if inner.channel_names.is_none() {
            inner.channel_names = Some(packet.channels().to_vec());
            inner.device_id = Some(packet.device_id().to_string());
        }

        let start = inner.write_pos;
        let t0 = packet.timestamp().timestamp_nanos_opt().unwrap_or(0) as f64 / 1e9;
        let dt = 1.0 / self.sampling_rate_hz;
        // The packet may be longer than the buffer; only the tail survives
        // anyway, so copy sample-by-sample modulo capacity.
        for i in 0..n {
            let pos = (start + i) % self.capacity;
            for (c, row) in packet.data().iter().enumerate() {
                inner.data[c][pos] = row[i];
            }
            inner.timestamps[pos] = t0 + i as f64 * dt;
        }

        inner.write_pos = (start + n) % self.capacity;
        inner.samples_written += n as u64;
        Ok(())
    }

    /// Extract the most recent `duration_ms` of samples.
    ///
    /// Returns `None` until enough samples have been written, or when the
    /// request exceeds the buffer capacity.
    pub fn window(&self, duration_ms: f64) -> Option<Window> {
        let n = ((duration_ms / 1000.0) * self.sampling_rate_hz).round() as usize;
        if n == 0 || n > self.capacity {
            return None;
        }

        let inner = self.inner.lock();
        if inner.samples_written < n as u64 {
            return None;
        }

        let saturated = inner.samples_written >= self.capacity as u64;
        let start = if saturated {
            (inner.write_pos + self.capacity - n) % self.capacity
        } else {
            inner.write_pos.saturating_sub(n)
        };

        let mut data = vec![Vec::with_capacity(n); self.channels];
        for i in 0..n {
            let pos = (start + i) % self.capacity;
            for (c, out) in data.iter_mut().enumerate() {
                out.push(inner.data[c][pos]);
            }
        }

        let start_ts = epoch_secs_to_datetime(inner.timestamps[start]);
        let channels = inner
            .channel_names
            .clone()
            .unwrap_or_else(|| (0..self.channels).map(|i| format!("ch_{}", i)).collect());

        Some(Window {
            channels,
            sampling_rate_hz: self.sampling_rate_hz,
            data,
            start_timestamp: start_ts,
            duration_ms,
        })
    }

    /// Samples currently held, capped at capacity.
    pub fn len_samples(&self) -> usize {
        let inner = self.inner.lock();
        inner.samples_written.min(self.capacity as u64) as usize
    }

    /// Duration of signal currently held, in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        (self.len_samples() as f64 / self.sampling_rate_hz) * 1000.0
    }

    pub fn is_saturated(&self) -> bool {
        let inner = self.inner.lock();
        inner.samples_written >= self.capacity as u64
    }

    /// Reset to all zeros. Channel identity is kept; a stream that
    /// reconnects keeps its buffer but restarts its timestamp base.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for row in inner.data.iter_mut() {
            row.fill(0.0);
        }
        inner.timestamps.fill(0.0);
        inner.write_pos = 0;
        inner.samples_written = 0;
    }
}

fn epoch_secs_to_datetime(secs: f64) -> DateTime<Utc> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos)
        .single()
        .unwrap_or_else(Utc::now)
}
