//! Metering bus: per-channel signal metrics published by the demodulator and
//! read by anything that wants a cheap, lock-free snapshot (status CLI,
//! future HTTP API) without blocking the DSP producer (spec §4.5).
//!
//! Grounded in the teacher's `vu_channel_service.rs` VU-meter fan-out
//! (`crossbeam_channel` bounded broadcast to UI listeners), adapted from a
//! push channel to a versioned snapshot store since the spec calls for
//! "latest value wins" semantics rather than queued delivery. The swap
//! itself uses `arc_swap::ArcSwap`, the lock-free snapshot primitive named
//! in the wider pack (see the `synthizer` manifest).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

/// `status` ∈ {"signal", "no-signal"} reported alongside each channel's
/// metrics (spec's external Metrics interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalStatus {
    Signal,
    NoSignal,
}

/// One channel's latest signal metrics, published at most once per DSP block.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignalMetrics {
    pub version: u64,
    pub signal_dbfs: f32,
    pub noise_floor_dbfs: f32,
    pub squelch_level_dbfs: f32,
    pub snr_db: f32,
    pub squelch_open: bool,
    pub afc_offset_hz: f32,
    /// Number of times the CTCSS latch has opened for the matching tone,
    /// not just whether it is currently latched.
    pub ctcss_count: u64,
    pub is_recording: bool,
    pub status: SignalStatus,
    pub updated_at_unix_ms: u64,
}

impl Default for SignalMetrics {
    fn default() -> Self {
        Self {
            version: 0,
            signal_dbfs: -120.0,
            noise_floor_dbfs: -120.0,
            squelch_level_dbfs: -120.0,
            snr_db: 0.0,
            squelch_open: false,
            afc_offset_hz: 0.0,
            ctcss_count: 0,
            is_recording: false,
            status: SignalStatus::NoSignal,
            updated_at_unix_ms: 0,
        }
    }
}

type ChannelKey = (u32, u32);

/// Process-wide metering store, keyed by `(device_index, channel_index)`.
///
/// Each channel gets its own `ArcSwap` slot so one demodulator publishing a
/// new snapshot never contends with another channel's readers or writer.
#[derive(Default)]
pub struct MeteringBus {
    slots: std::sync::RwLock<HashMap<ChannelKey, Arc<ArcSwap<SignalMetrics>>>>,
    version_counter: AtomicU64,
}

impl MeteringBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: ChannelKey) -> Arc<ArcSwap<SignalMetrics>> {
        if let Some(slot) = self.slots.read().expect("metering read lock poisoned").get(&key) {
            return slot.clone();
        }
        let mut slots = self.slots.write().expect("metering write lock poisoned");
        slots
            .entry(key)
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(SignalMetrics::default())))
            .clone()
    }

    /// Publishes a new snapshot for a channel. Never blocks on readers.
    pub fn publish(&self, device_index: u32, channel_index: u32, mut metrics: SignalMetrics) {
        metrics.version = self.version_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.slot((device_index, channel_index)).store(Arc::new(metrics));
    }

    /// Reads the latest snapshot for a channel, or the default if the
    /// channel has never published (e.g. not yet started).
    pub fn read(&self, device_index: u32, channel_index: u32) -> SignalMetrics {
        **self.slot((device_index, channel_index)).load()
    }

    /// Snapshot of every channel currently tracked, for the `status` CLI
    /// subcommand and future HTTP exposure.
    pub fn read_all(&self) -> HashMap<ChannelKey, SignalMetrics> {
        self.slots
            .read()
            .expect("metering read lock poisoned")
            .iter()
            .map(|(k, v)| (*k, **v.load()))
            .collect()
    }

    pub fn remove(&self, device_index: u32, channel_index: u32) {
        self.slots
            .write()
            .expect("metering write lock poisoned")
            .remove(&(device_index, channel_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_read_roundtrips() {
        let bus = MeteringBus::new();
        bus.publish(
            0,
            1,
            SignalMetrics {
                signal_dbfs: -40.0,
                squelch_open: true,
                ..Default::default()
            },
        );
        let read = bus.read(0, 1);
        assert_eq!(read.signal_dbfs, -40.0);
        assert!(read.squelch_open);
        assert!(read.version > 0);
    }

    #[test]
    fn unpublished_channel_reads_default() {
        let bus = MeteringBus::new();
        let read = bus.read(9, 9);
        assert_eq!(read.version, 0);
        assert!(!read.squelch_open);
    }

    #[test]
    fn versions_monotonically_increase_across_channels() {
        let bus = MeteringBus::new();
        bus.publish(0, 0, SignalMetrics::default());
        bus.publish(0, 1, SignalMetrics::default());
        bus.publish(0, 0, SignalMetrics::default());
        let a = bus.read(0, 0);
        let b = bus.read(0, 1);
        assert!(a.version > b.version);
    }
}
