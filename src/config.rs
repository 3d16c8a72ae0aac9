//! Declarative device/channel/sink configuration.
//!
//! The control plane owns persistence; this module only models the shape of
//! the config it posts and the validation/diffing the core performs on it
//! (spec §3 Data Model, §6 Config).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::SkywaveError;

/// Hard ceiling on active channels per device (spec §3 invariant).
pub const MAX_CHANNELS_PER_DEVICE: usize = 8;

/// Base UDP port; a channel's default is `UDP_PORT_BASE + channel_index`.
pub const UDP_PORT_BASE: u16 = 6001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    UsbSdr,
    File,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    Am,
    Nfm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquelchConfig {
    /// Explicit threshold in dBFS; if absent, squelch is automatic
    /// (`noise_floor + hysteresis`, see spec §4.3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_dbfs: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr_db: Option<f32>,
    #[serde(default = "default_open_hysteresis_db")]
    pub open_hysteresis_db: f32,
    #[serde(default = "default_close_hysteresis_db")]
    pub close_hysteresis_db: f32,
    #[serde(default = "default_hang_ms")]
    pub hang_ms: u32,
}

fn default_open_hysteresis_db() -> f32 {
    6.0
}
fn default_close_hysteresis_db() -> f32 {
    3.0
}
fn default_hang_ms() -> u32 {
    150
}

impl Default for SquelchConfig {
    fn default() -> Self {
        Self {
            threshold_dbfs: None,
            snr_db: None,
            open_hysteresis_db: default_open_hysteresis_db(),
            close_hysteresis_db: default_close_hysteresis_db(),
            hang_ms: default_hang_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub index: u32,
    pub kind: DeviceKind,
    pub sample_rate_hz: u32,
    pub center_freq_hz: u64,
    #[serde(default)]
    pub gain_db: f32,
    #[serde(default)]
    pub freq_correction_ppm: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Only meaningful for `DeviceKind::File`.
    #[serde(default)]
    pub replay_path: Option<String>,
    #[serde(default = "default_speedup")]
    pub speedup_factor: f64,
    pub channels: Vec<ChannelConfig>,
}

fn default_true() -> bool {
    true
}
fn default_fft_size() -> usize {
    4096
}
fn default_speedup() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_index: u32,
    #[serde(default)]
    pub label: String,
    pub freq_hz: u64,
    pub modulation: Modulation,
    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: u32,
    #[serde(default = "default_highpass_hz")]
    pub highpass_hz: f32,
    #[serde(default = "default_lowpass_hz")]
    pub lowpass_hz: f32,
    #[serde(default = "default_amp_factor")]
    pub amp_factor: f32,
    #[serde(default)]
    pub squelch: SquelchConfig,
    #[serde(default = "default_afc_steps")]
    pub afc_steps: u32,
    #[serde(default)]
    pub notch_hz: f32,
    #[serde(default = "default_notch_q")]
    pub notch_q: f32,
    #[serde(default)]
    pub ctcss_tone_hz: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub outputs: Vec<SinkConfig>,
}

fn default_bandwidth_hz() -> u32 {
    12_500
}
fn default_highpass_hz() -> f32 {
    300.0
}
fn default_lowpass_hz() -> f32 {
    2_500.0
}
fn default_amp_factor() -> f32 {
    1.0
}
fn default_afc_steps() -> u32 {
    8
}
fn default_notch_q() -> f32 {
    10.0
}

impl ChannelConfig {
    /// Default UDP port, derived once at activation, never recomputed in the
    /// hot path (design note in spec §9).
    pub fn default_udp_port(&self) -> u16 {
        UDP_PORT_BASE + self.channel_index as u16
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    File(FileSinkConfig),
    UdpStream(UdpSinkConfig),
    Icecast(IcecastSinkConfig),
    HttpApi(HttpApiSinkConfig),
    Redis(RedisSinkConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Mp3,
    Wav,
    RawPcm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSinkConfig {
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    #[serde(default = "default_format")]
    pub format: FileFormat,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "default_true")]
    pub split_on_transmission: bool,
    #[serde(default)]
    pub include_freq: bool,
    #[serde(default)]
    pub append: bool,
    #[serde(default = "default_true")]
    pub dated_subdirectories: bool,
    #[serde(default)]
    pub chunk_duration_minutes: Option<u32>,
}

fn default_filename_template() -> String {
    "{timestamp}".to_string()
}
fn default_format() -> FileFormat {
    FileFormat::Mp3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSinkConfig {
    pub dest_address: String,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub as_mp3: bool,
    #[serde(default = "default_true")]
    pub udp_headers: bool,
    #[serde(default = "default_true")]
    pub udp_chunking: bool,
    #[serde(default)]
    pub continuous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcecastSinkConfig {
    pub server: String,
    pub port: u16,
    pub mountpoint: String,
    pub password: String,
    #[serde(default = "default_stream_name")]
    pub name: String,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
}

fn default_stream_name() -> String {
    "skywave".to_string()
}
fn default_bitrate_kbps() -> u32 {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpApiSinkConfig {
    pub endpoint_url: String,
    #[serde(default)]
    pub inline_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSinkConfig {
    pub connection_url: String,
}

impl SinkConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            SinkConfig::File(_) => "file",
            SinkConfig::UdpStream(_) => "udp_stream",
            SinkConfig::Icecast(_) => "icecast",
            SinkConfig::HttpApi(_) => "http_api",
            SinkConfig::Redis(_) => "redis",
        }
    }

    /// Identity key used for idempotent topology comparisons (spec §8):
    /// `(device_index, channel_index, sink_type, endpoint)`.
    pub fn endpoint_key(&self) -> String {
        match self {
            SinkConfig::File(c) => c.directory.clone().unwrap_or_default() + &c.filename_template,
            SinkConfig::UdpStream(c) => format!("{}:{:?}", c.dest_address, c.dest_port),
            SinkConfig::Icecast(c) => format!("{}:{}/{}", c.server, c.port, c.mountpoint),
            SinkConfig::HttpApi(c) => c.endpoint_url.clone(),
            SinkConfig::Redis(c) => c.connection_url.clone(),
        }
    }
}

/// Top-level config posted atomically by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub devices: Vec<DeviceConfig>,
}

impl SystemConfig {
    /// Validates the invariants from spec §3. A channel-local violation
    /// (out-of-band frequency, or the 9th+ channel on a device) produces a
    /// `Config` error naming the offending channel but does not reject the
    /// rest of the config -- scenario 5/1 in spec §8 require other channels
    /// to keep starting.
    pub fn validate(&self) -> Vec<SkywaveError> {
        let mut errors = Vec::new();
        let mut device_indices = HashSet::new();

        for device in &self.devices {
            if !device_indices.insert(device.index) {
                errors.push(SkywaveError::Config(format!(
                    "duplicate device index {}",
                    device.index
                )));
            }

            let enabled_channels: Vec<&ChannelConfig> =
                device.channels.iter().filter(|c| c.enabled).collect();
            if enabled_channels.len() > MAX_CHANNELS_PER_DEVICE {
                errors.push(SkywaveError::DeviceRejected {
                    device: device.index,
                    reason: format!(
                        "enables {} channels, exceeding the {}-channel ceiling",
                        enabled_channels.len(),
                        MAX_CHANNELS_PER_DEVICE
                    ),
                });
            }

            let half_band = device.sample_rate_hz as i64 / 2;
            let mut channel_indices = HashSet::new();
            for channel in &device.channels {
                if !channel_indices.insert(channel.channel_index) {
                    errors.push(SkywaveError::ChannelRejected {
                        device: device.index,
                        channel: channel.channel_index,
                        reason: "duplicate channel_index on this device".to_string(),
                    });
                }

                let offset = channel.freq_hz as i64 - device.center_freq_hz as i64;
                if offset.abs() > half_band {
                    errors.push(SkywaveError::ChannelRejected {
                        device: device.index,
                        channel: channel.channel_index,
                        reason: format!(
                            "{} Hz lies outside device {}'s band ({} +/- {} Hz)",
                            channel.freq_hz, device.index, device.center_freq_hz, half_band
                        ),
                    });
                }
            }
        }

        errors
    }

    /// Pure diff against a previous config, used to stop only affected
    /// devices/channels on live-reconfiguration (spec §6).
    pub fn diff(&self, previous: &SystemConfig) -> ConfigDiff {
        let mut diff = ConfigDiff::default();

        for device in &self.devices {
            match previous.devices.iter().find(|d| d.index == device.index) {
                None => diff.added_devices.push(device.index),
                Some(prev) if !device_topology_eq(device, prev) => {
                    diff.changed_devices.push(device.index)
                }
                _ => {}
            }
        }
        for prev in &previous.devices {
            if !self.devices.iter().any(|d| d.index == prev.index) {
                diff.removed_devices.push(prev.index);
            }
        }

        diff
    }
}

fn device_topology_eq(a: &DeviceConfig, b: &DeviceConfig) -> bool {
    a.sample_rate_hz == b.sample_rate_hz
        && a.center_freq_hz == b.center_freq_hz
        && a.fft_size == b.fft_size
        && a.channels.len() == b.channels.len()
        && a.channels.iter().zip(&b.channels).all(|(x, y)| {
            x.channel_index == y.channel_index
                && x.freq_hz == y.freq_hz
                && x.modulation == y.modulation
                && x.enabled == y.enabled
                && x.outputs.len() == y.outputs.len()
                && x.outputs
                    .iter()
                    .zip(&y.outputs)
                    .all(|(sx, sy)| sx.type_name() == sy.type_name() && sx.endpoint_key() == sy.endpoint_key())
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added_devices: Vec<u32>,
    pub removed_devices: Vec<u32>,
    pub changed_devices: Vec<u32>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added_devices.is_empty() && self.removed_devices.is_empty() && self.changed_devices.is_empty()
    }
}
