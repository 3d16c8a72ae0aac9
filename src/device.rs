//! Device lifecycle (spec §3 Data Model): owns the Input Stage, Channelizer,
//! and all Channels for one physical or file-replay source.
//!
//! State naming follows the teacher's `DeviceStatus`/`DeviceHealth` pair in
//! `audio/devices/types.rs`, collapsed to the three states the spec's
//! propagation rules actually distinguish.

use crate::channel::Channel;
use crate::config::DeviceConfig;
use crate::error::SkywaveError;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    Stopped,
    Running,
    Failed { reason: String },
}

pub struct Device {
    pub config: DeviceConfig,
    pub state: DeviceState,
    pub channels: Vec<Channel>,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .map(Channel::new)
            .collect();
        Self {
            config,
            state: DeviceState::Stopped,
            channels,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = DeviceState::Running;
    }

    /// A fatal input error stops this device's pipeline atomically; other
    /// devices are unaffected (spec §7 propagation rules).
    pub fn mark_failed(&mut self, err: &SkywaveError) {
        self.state = DeviceState::Failed { reason: err.to_string() };
    }

    /// File-replay end-of-stream transitions to `Stopped`, not `Failed`
    /// (spec §4.1).
    pub fn mark_stopped(&mut self) {
        self.state = DeviceState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        self.state == DeviceState::Running
    }

    pub fn channel_mut(&mut self, channel_index: u32) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.config.channel_index == channel_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceKind;

    fn empty_device_config() -> DeviceConfig {
        DeviceConfig {
            index: 0,
            kind: DeviceKind::File,
            sample_rate_hz: 2_400_000,
            center_freq_hz: 118_350_000,
            gain_db: 0.0,
            freq_correction_ppm: 0.0,
            enabled: true,
            fft_size: 4096,
            replay_path: None,
            speedup_factor: 1.0,
            channels: Vec::new(),
        }
    }

    #[test]
    fn starts_stopped_and_transitions_to_running() {
        let mut device = Device::new(empty_device_config());
        assert_eq!(device.state, DeviceState::Stopped);
        device.mark_running();
        assert!(device.is_running());
    }

    #[test]
    fn fatal_error_marks_failed_with_reason() {
        let mut device = Device::new(empty_device_config());
        device.mark_running();
        device.mark_failed(&SkywaveError::InputFatal {
            device: "dev0".to_string(),
            reason: "usb disconnected".to_string(),
        });
        assert!(matches!(device.state, DeviceState::Failed { .. }));
        assert!(!device.is_running());
    }

    #[test]
    fn end_of_stream_stops_rather_than_fails() {
        let mut device = Device::new(empty_device_config());
        device.mark_running();
        device.mark_stopped();
        assert_eq!(device.state, DeviceState::Stopped);
    }
}
