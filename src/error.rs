//! Error taxonomy shared across the pipeline.
//!
//! Internal task bodies use `anyhow::Result` for ergonomic propagation;
//! `SkywaveError` is the typed surface crossed at public API boundaries and
//! published to the runtime's error feed (see [`crate::runtime::ErrorFeed`]).

use thiserror::Error;

/// Component tag attached to error-feed entries, per spec §7 ("component tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Config,
    Device,
    Channelizer,
    Demod,
    Sink,
    Internal,
}

#[derive(Debug, Error, Clone)]
pub enum SkywaveError {
    /// Config-wide and ambiguous to route around: duplicate device index.
    /// Aborts the whole `Pipeline::start` call, unlike the device/channel
    /// scoped rejections below.
    #[error("config error: {0}")]
    Config(String),

    /// One device's channel count exceeds the per-device ceiling. That
    /// device is skipped; every other device still starts.
    #[error("device {device} rejected: {reason}")]
    DeviceRejected { device: u32, reason: String },

    /// One channel is invalid on an otherwise-startable device (out-of-band
    /// frequency, duplicate channel_index). That channel is skipped; every
    /// other channel on the device, and every other device, still starts.
    #[error("device {device} channel {channel} rejected: {reason}")]
    ChannelRejected { device: u32, channel: u32, reason: String },

    /// Driver open/tune failure.
    #[error("device init failed for '{device}': {reason}")]
    DeviceInit { device: String, reason: String },

    /// Retried internally; never surfaces above the input stage.
    #[error("transient input error on '{device}': {reason}")]
    InputTransient { device: String, reason: String },

    /// Device transitions to Failed.
    #[error("fatal input error on '{device}': {reason}")]
    InputFatal { device: String, reason: String },

    /// File-replay exhausted. Device transitions to Stopped, not Failed.
    #[error("end of stream on '{device}'")]
    EndOfStream { device: String },

    /// Counted, non-fatal.
    #[error("channelizer overrun on device '{device}' channel {channel}")]
    ChannelizerOverrun { device: String, channel: u32 },

    /// Retried with backoff; sink stays alive.
    #[error("transient sink error ({sink}): {reason}")]
    SinkTransient { sink: String, reason: String },

    /// Sink disabled; channel continues.
    #[error("fatal sink error ({sink}): {reason}")]
    SinkFatal { sink: String, reason: String },

    /// Assertion/bug; logged, best-effort continue.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SkywaveError {
    pub fn component(&self) -> Component {
        match self {
            SkywaveError::Config(_) | SkywaveError::DeviceRejected { .. } | SkywaveError::ChannelRejected { .. } => {
                Component::Config
            }
            SkywaveError::DeviceInit { .. }
            | SkywaveError::InputTransient { .. }
            | SkywaveError::InputFatal { .. }
            | SkywaveError::EndOfStream { .. } => Component::Device,
            SkywaveError::ChannelizerOverrun { .. } => Component::Channelizer,
            SkywaveError::SinkTransient { .. } | SkywaveError::SinkFatal { .. } => Component::Sink,
            SkywaveError::Internal(_) => Component::Internal,
        }
    }

    /// Whether this error kind is allowed to propagate and stop the whole
    /// `Pipeline::start` call (spec §7 propagation rules). `DeviceRejected`
    /// and `ChannelRejected` are deliberately excluded: they scope the
    /// rejection to one device or one channel, letting every sibling
    /// device/channel still start (spec §8 scenario 5).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SkywaveError::Config(_) | SkywaveError::DeviceInit { .. } | SkywaveError::InputFatal { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SkywaveError>;
