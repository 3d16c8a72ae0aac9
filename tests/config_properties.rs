//! Property tests against `SystemConfig::validate`/`diff` (spec §8).

use proptest::prelude::*;
use skywave_core::config::{ChannelConfig, DeviceConfig, DeviceKind, Modulation, SquelchConfig, SystemConfig};

fn channel_at(channel_index: u32, freq_hz: u64) -> ChannelConfig {
    ChannelConfig {
        channel_index,
        label: format!("ch{channel_index}"),
        freq_hz,
        modulation: Modulation::Am,
        bandwidth_hz: 12_500,
        highpass_hz: 100.0,
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

fn device_with_channels(count: usize, center_freq_hz: u64, sample_rate_hz: u32) -> DeviceConfig {
    let half_band = sample_rate_hz as u64 / 2;
    let channels = (0..count)
        .map(|i| {
            // Spread channels evenly inside the band so only the channel
            // *count* is under test, never an out-of-band rejection.
            let spread = if count > 1 { (half_band / count as u64) * i as u64 } else { 0 };
            channel_at(i as u32, center_freq_hz - half_band / 2 + spread)
        })
        .collect();
    DeviceConfig {
        index: 0,
        kind: DeviceKind::File,
        sample_rate_hz,
        center_freq_hz,
        gain_db: 0.0,
        freq_correction_ppm: 0.0,
        enabled: true,
        fft_size: 4096,
        replay_path: None,
        speedup_factor: 1.0,
        channels,
    }
}

proptest! {
    /// For all channel counts <= 8, with in-band frequencies, startup never
    /// reports a ceiling violation.
    #[test]
    fn channel_counts_at_or_under_ceiling_never_report_overflow(count in 1usize..=8) {
        let cfg = SystemConfig { devices: vec![device_with_channels(count, 100_000_000, 2_000_000)] };
        let errors = cfg.validate();
        prop_assert!(!errors.iter().any(|e| e.to_string().contains("ceiling")));
    }

    /// For any channel count above 8, startup always reports a ceiling
    /// violation naming the device.
    #[test]
    fn channel_counts_over_ceiling_always_report_overflow(count in 9usize..=16) {
        let cfg = SystemConfig { devices: vec![device_with_channels(count, 100_000_000, 2_000_000)] };
        let errors = cfg.validate();
        prop_assert!(errors.iter().any(|e| e.to_string().contains("ceiling")));
    }

    /// Diffing a config against a structurally identical clone always
    /// reports an empty diff, regardless of device/channel count.
    #[test]
    fn identical_topology_diffs_to_empty(count in 1usize..=8) {
        let cfg = SystemConfig { devices: vec![device_with_channels(count, 100_000_000, 2_000_000)] };
        let same = cfg.clone();
        let diff = cfg.diff(&same);
        prop_assert!(diff.is_empty());
    }
}

#[test]
fn nine_channels_reports_error_naming_the_offending_device() {
    let cfg = SystemConfig { devices: vec![device_with_channels(9, 100_000_000, 2_000_000)] };
    let errors = cfg.validate();
    assert!(errors.iter().any(|e| e.to_string().contains("device 0")));
}

#[test]
fn out_of_band_channel_names_the_channel_while_others_still_validate() {
    let mut device = device_with_channels(2, 120_000_000, 2_000_000);
    device.channels.push(channel_at(2, 150_000_000)); // far outside a 2 MS/s band
    let cfg = SystemConfig { devices: vec![device] };
    let errors = cfg.validate();
    assert!(errors.iter().any(|e| e.to_string().contains("channel 2")));
}
