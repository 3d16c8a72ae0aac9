//! Process-wide runtime handle.
//!
//! Per the design note against global mutable state, the only process-wide
//! structures are the bounded error feed and the metering bus; everything
//! else is owned top-down (`Runtime` owns `Device`s, `Device` owns `Channel`s,
//! `Channel` owns its sinks) with upward notification only through these two.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::config::SystemConfig;
use crate::error::{Component, SkywaveError};
use crate::metering::MeteringBus;
use crate::pipeline::Pipeline;

/// Max entries retained in the error feed before the oldest is evicted.
pub const ERROR_FEED_CAPACITY: usize = 128;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorEntry {
    pub component: Component,
    pub message: String,
    pub fatal: bool,
}

/// Bounded, ring-evicting feed of user-visible error strings (spec §9).
#[derive(Default)]
pub struct ErrorFeed {
    entries: Mutex<VecDeque<ErrorEntry>>,
}

impl ErrorFeed {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(ERROR_FEED_CAPACITY)),
        }
    }

    pub fn push(&self, err: &SkywaveError) {
        let entry = ErrorEntry {
            component: err.component(),
            message: err.to_string(),
            fatal: err.is_fatal(),
        };

        if entry.fatal {
            error!(component = ?entry.component, "{}", entry.message);
        } else {
            warn!(component = ?entry.component, "{}", entry.message);
        }

        let mut entries = self.entries.lock().expect("error feed poisoned");
        if entries.len() == ERROR_FEED_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<ErrorEntry> {
        self.entries.lock().expect("error feed poisoned").iter().cloned().collect()
    }
}

/// Top-level handle tying config, metering and the error feed together.
///
/// Owns no device/channel state directly -- that lives in `pipeline::Pipeline`,
/// constructed from this handle's config. `Runtime` is the thing `main.rs`
/// holds for the lifetime of the process.
pub struct Runtime {
    pub config: SystemConfig,
    pub errors: ErrorFeed,
    pub metering: Arc<MeteringBus>,
    pipeline: Option<Pipeline>,
}

impl Runtime {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            errors: ErrorFeed::new(),
            metering: Arc::new(MeteringBus::new()),
            pipeline: None,
        }
    }

    pub fn report(&self, err: SkywaveError) {
        self.errors.push(&err);
    }

    /// Activates the pipeline for the current config. Channel-local
    /// rejections (out-of-band frequency, ceiling overflow) are reported to
    /// the error feed but do not prevent the rest of the config from
    /// starting (spec §7/§8); only a config-wide fatal error aborts.
    pub fn start_pipeline(&mut self) -> Result<(), Vec<SkywaveError>> {
        let (pipeline, skipped) = Pipeline::start(self.config.clone())?;
        for err in skipped {
            self.report(err);
        }
        self.metering = pipeline.metering.clone();
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Moves any fatal device errors raised since the last call into the
    /// error feed. Call periodically from the supervisory loop.
    pub fn poll_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            for (_device_index, err) in pipeline.poll_errors() {
                self.report(err);
            }
        }
    }

    /// Stops every pipeline task in LIFO order (spec §5). No-op if the
    /// pipeline was never started.
    pub async fn shutdown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown().await;
        }
    }

    /// Replaces the active config, returning the diff the caller should act
    /// on (restart only the affected devices). Only a config-wide fatal
    /// error leaves the previous config in place; device/channel-local
    /// rejections are reported to the error feed but still let the rest of
    /// the new config take effect (spec §8 scenario 5).
    pub fn reconfigure(&mut self, new_config: SystemConfig) -> Result<crate::config::ConfigDiff, Vec<SkywaveError>> {
        let errors = new_config.validate();
        let fatal: Vec<SkywaveError> = errors.iter().filter(|e| e.is_fatal()).cloned().collect();
        if !fatal.is_empty() {
            for e in &fatal {
                self.report(e.clone());
            }
            return Err(fatal);
        }
        for e in &errors {
            self.report(e.clone());
        }
        let diff = new_config.diff(&self.config);
        info!(
            added = diff.added_devices.len(),
            removed = diff.removed_devices.len(),
            changed = diff.changed_devices.len(),
            "applying config diff"
        );
        self.config = new_config;
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_feed_evicts_oldest_past_capacity() {
        let feed = ErrorFeed::new();
        for i in 0..(ERROR_FEED_CAPACITY + 10) {
            feed.push(&SkywaveError::Internal(format!("err {i}")));
        }
        let snap = feed.snapshot();
        assert_eq!(snap.len(), ERROR_FEED_CAPACITY);
        assert!(snap.first().unwrap().message.contains("err 10"));
    }

    fn device_with_one_channel(index: u32, freq_hz: u64) -> crate::config::DeviceConfig {
        crate::config::DeviceConfig {
            index,
            kind: crate::config::DeviceKind::File,
            sample_rate_hz: 1_000_000,
            center_freq_hz: 100_000_000,
            gain_db: 0.0,
            freq_correction_ppm: 0.0,
            enabled: true,
            fft_size: 4096,
            replay_path: None,
            speedup_factor: 1.0,
            channels: vec![crate::config::ChannelConfig {
                channel_index: 0,
                label: "x".into(),
                freq_hz,
                modulation: crate::config::Modulation::Am,
                bandwidth_hz: 12_500,
                highpass_hz: 300.0,
                lowpass_hz: 2500.0,
                amp_factor: 1.0,
                squelch: Default::default(),
                afc_steps: 8,
                notch_hz: 0.0,
                notch_q: 10.0,
                ctcss_tone_hz: 0.0,
                enabled: true,
                outputs: vec![],
            }],
        }
    }

    #[test]
    fn reconfigure_rejects_duplicate_device_index_and_keeps_previous() {
        let mut rt = Runtime::new(SystemConfig::default());
        let bad = SystemConfig {
            devices: vec![device_with_one_channel(0, 100_000_000), device_with_one_channel(0, 100_100_000)],
        };
        assert!(rt.reconfigure(bad).is_err());
        assert!(rt.config.devices.is_empty());
    }

    #[test]
    fn reconfigure_applies_config_despite_a_channel_local_rejection() {
        let mut rt = Runtime::new(SystemConfig::default());
        // freq_hz 200_000_000 is out of this device's 100_000_000 +/- 500_000 band.
        let partly_bad = SystemConfig { devices: vec![device_with_one_channel(0, 200_000_000)] };
        let result = rt.reconfigure(partly_bad);
        assert!(result.is_ok(), "a channel-local rejection must not block the rest of the config");
        assert_eq!(rt.config.devices.len(), 1);
        assert!(rt.errors.snapshot().iter().any(|e| matches!(e.component, Component::Config)));
    }
}
