//! Channel lifecycle: owns the demodulator and the sink list for one
//! enabled channel (spec §3 Data Model). Created when a device activates,
//! torn down (along with its sinks) when the channel is disabled.

use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Stopped,
    Running,
    Disabled,
}

pub struct Channel {
    pub config: ChannelConfig,
    pub state: ChannelState,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: ChannelState::Stopped,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = ChannelState::Running;
    }

    /// A channel-local fatal error (e.g. out-of-band frequency) disables
    /// only this channel; the device and its siblings continue (spec §7).
    pub fn mark_disabled(&mut self) {
        self.state = ChannelState::Disabled;
    }

    pub fn default_udp_port(&self) -> u16 {
        self.config.default_udp_port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Modulation, SquelchConfig};

    fn cfg() -> ChannelConfig {
        ChannelConfig {
            channel_index: 2,
            label: "ch2".to_string(),
            freq_hz: 118_200_000,
            modulation: Modulation::Am,
            bandwidth_hz: 12_500,
            highpass_hz: 300.0,
            lowpass_hz: 2_500.0,
            amp_factor: 1.0,
            squelch: SquelchConfig::default(),
            afc_steps: 8,
            notch_hz: 0.0,
            notch_q: 10.0,
            ctcss_tone_hz: 0.0,
            enabled: true,
            outputs: Vec::new(),
        }
    }

    #[test]
    fn default_udp_port_derived_from_channel_index() {
        let ch = Channel::new(cfg());
        assert_eq!(ch.default_udp_port(), 6001 + 2);
    }

    #[test]
    fn disable_is_terminal_for_this_channel_only() {
        let mut ch = Channel::new(cfg());
        ch.mark_running();
        ch.mark_disabled();
        assert_eq!(ch.state, ChannelState::Disabled);
    }
}
