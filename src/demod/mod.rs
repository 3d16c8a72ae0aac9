//! Per-channel demodulator (spec §4.3): turns one channel's decimated
//! complex-baseband stream into gated, filtered PCM audio frames and
//! publishes signal metrics for that tick.

pub mod afc;
pub mod am;
pub mod ctcss;
pub mod nfm;
pub mod squelch;

use num_complex::Complex32;

use crate::channelizer::ChannelBatch;
use crate::config::{ChannelConfig, Modulation};
use crate::metering::{MeteringBus, SignalMetrics, SignalStatus};

use afc::AfcTracker;
use am::AmDemodulator;
use ctcss::CtcssGate;
use nfm::NfmDemodulator;
use squelch::SquelchDetector;

/// Approximate PCM batch size referenced throughout the source as
/// `WAVE_BATCH` (spec §3 Data Model).
pub const WAVE_BATCH: usize = 1_000;

/// Muted duration after a NaN/Inf excursion is detected in filter state
/// (spec §9 "NaN containment").
const QUARANTINE_MS: u32 = 200;

enum ModDemodulator {
    Am(AmDemodulator),
    Nfm(NfmDemodulator),
}

impl ModDemodulator {
    fn process(&mut self, iq: Complex32) -> f32 {
        match self {
            ModDemodulator::Am(d) => d.process(iq),
            ModDemodulator::Nfm(d) => d.process(iq),
        }
    }

    fn is_unstable(&self) -> bool {
        match self {
            ModDemodulator::Am(d) => d.is_unstable(),
            ModDemodulator::Nfm(d) => d.is_unstable(),
        }
    }

    fn reset(&mut self) {
        match self {
            ModDemodulator::Am(d) => d.reset(),
            ModDemodulator::Nfm(d) => d.reset(),
        }
    }
}

/// One PCM batch handed to the output fan-out (spec §3 "Audio Frame").
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub channel_index: u32,
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
    pub timestamp_unix_ms: u64,
    pub squelch_open: bool,
}

pub struct ChannelDemodulator {
    device_index: u32,
    channel_index: u32,
    sample_rate_hz: u32,
    demod: ModDemodulator,
    squelch: SquelchDetector,
    ctcss: Option<CtcssGate>,
    afc: AfcTracker,
    quarantine_remaining: u32,
}

impl ChannelDemodulator {
    pub fn new(device_index: u32, cfg: &ChannelConfig, output_sample_rate_hz: u32, wideband_bin_hz: f32) -> Self {
        let demod = match cfg.modulation {
            Modulation::Am => ModDemodulator::Am(AmDemodulator::new(
                output_sample_rate_hz,
                cfg.highpass_hz,
                cfg.lowpass_hz,
                cfg.notch_hz,
                cfg.notch_q,
                cfg.amp_factor,
            )),
            Modulation::Nfm => ModDemodulator::Nfm(NfmDemodulator::new(
                output_sample_rate_hz,
                cfg.highpass_hz,
                cfg.lowpass_hz,
                cfg.notch_hz,
                cfg.notch_q,
                cfg.amp_factor,
            )),
        };

        Self {
            device_index,
            channel_index: cfg.channel_index,
            sample_rate_hz: output_sample_rate_hz,
            demod,
            squelch: SquelchDetector::new(output_sample_rate_hz, &cfg.squelch),
            ctcss: (cfg.ctcss_tone_hz > 0.0).then(|| CtcssGate::new(output_sample_rate_hz, cfg.ctcss_tone_hz)),
            afc: AfcTracker::new(cfg.afc_steps, output_sample_rate_hz, wideband_bin_hz),
            quarantine_remaining: 0,
        }
    }

    /// Demodulates one channelizer batch, gates it through squelch/CTCSS,
    /// publishes the tick's metrics, and returns the resulting audio frame.
    /// While Closed, the frame is still emitted (zeroed) so non-continuous
    /// sinks can drop it and continuous sinks stay in sync (spec §4.3).
    pub fn process_batch(&mut self, batch: &ChannelBatch, metering: &MeteringBus, now_unix_ms: u64) -> AudioFrame {
        self.afc.observe_batch(&batch.samples);

        let mut samples = Vec::with_capacity(batch.samples.len());
        let mut rf_squelch_open = false;
        let mut ctcss_gate_open = true;

        for &iq in &batch.samples {
            let demodulated = if self.quarantine_remaining > 0 {
                self.quarantine_remaining -= 1;
                0.0
            } else {
                self.demod.process(iq)
            };

            if self.demod.is_unstable() {
                self.demod.reset();
                self.quarantine_remaining = (QUARANTINE_MS as f32 / 1000.0 * self.sample_rate_hz as f32) as u32;
            }

            let open = self.squelch.process(demodulated);
            rf_squelch_open = open;

            let gate_open = match &mut self.ctcss {
                Some(gate) => {
                    let latched = gate.process(demodulated);
                    ctcss_gate_open = latched;
                    latched
                }
                None => true,
            };

            let audible = open && gate_open && self.quarantine_remaining == 0;
            samples.push(if audible { demodulated } else { 0.0 });
        }

        let squelch_open = rf_squelch_open && ctcss_gate_open;

        metering.publish(
            self.device_index,
            self.channel_index,
            SignalMetrics {
                version: 0,
                signal_dbfs: self.squelch.signal_dbfs(),
                noise_floor_dbfs: self.squelch.noise_floor_dbfs(),
                squelch_level_dbfs: self.squelch.threshold_dbfs(),
                snr_db: self.squelch.snr_db(),
                squelch_open,
                afc_offset_hz: self.afc.offset_hz(),
                ctcss_count: self.ctcss.as_ref().map_or(0, |gate| gate.tone_count),
                is_recording: squelch_open,
                status: if rf_squelch_open { SignalStatus::Signal } else { SignalStatus::NoSignal },
                updated_at_unix_ms: now_unix_ms,
            },
        );

        AudioFrame {
            channel_index: self.channel_index,
            samples,
            sample_rate_hz: self.sample_rate_hz,
            timestamp_unix_ms: now_unix_ms,
            squelch_open,
        }
    }

    pub fn afc_offset_hz(&self) -> f32 {
        self.afc.offset_hz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SquelchConfig;

    fn am_channel() -> ChannelConfig {
        ChannelConfig {
            channel_index: 0,
            label: "test".to_string(),
            freq_hz: 118_500_000,
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

    #[test]
    fn strong_am_tone_opens_squelch_and_passes_audio() {
        let cfg = am_channel();
        let mut demod = ChannelDemodulator::new(0, &cfg, 48_000, 500.0);
        let metering = MeteringBus::new();

        let mut last_open = false;
        for block in 0..40 {
            let samples: Vec<Complex32> = (0..1_200)
                .map(|n| {
                    let depth = 0.6
                        + 0.3
                            * (2.0 * std::f32::consts::PI * 1_000.0 * n as f32 / 48_000.0
                                + block as f32)
                                .sin();
                    Complex32::new(depth, 0.0)
                })
                .collect();
            let batch = ChannelBatch {
                channel_index: 0,
                samples,
            };
            let frame = demod.process_batch(&batch, &metering, block as u64 * 25);
            last_open = frame.squelch_open;
        }
        assert!(last_open);
    }

    #[test]
    fn silence_never_opens_squelch() {
        let cfg = am_channel();
        let mut demod = ChannelDemodulator::new(0, &cfg, 48_000, 500.0);
        let metering = MeteringBus::new();

        let batch = ChannelBatch {
            channel_index: 0,
            samples: vec![Complex32::new(0.0, 0.0); 4_000],
        };
        let frame = demod.process_batch(&batch, &metering, 0);
        assert!(!frame.squelch_open);
        assert!(frame.samples.iter().all(|&s| s == 0.0));
    }
}
