//! CTCSS sub-audible tone gate (spec §4.3): a narrow Goertzel detector on the
//! demodulated audio must show sustained energy for >= 250 ms before the
//! gate latches open, preventing same-frequency transmissions carrying a
//! different tone (or no tone) from reaching the sink.

use crate::dsp::goertzel::GoertzelDetector;

const SUSTAIN_MS: u32 = 250;
const BLOCK_MS: u32 = 50;

pub struct CtcssGate {
    detector: GoertzelDetector,
    power_threshold: f32,
    blocks_needed: u32,
    consecutive_above: u32,
    consecutive_below: u32,
    latched: bool,
    pub tone_count: u64,
}

impl CtcssGate {
    pub fn new(sample_rate_hz: u32, target_hz: f32) -> Self {
        let block_size = ((BLOCK_MS as f32 / 1000.0) * sample_rate_hz as f32).max(1.0) as usize;
        Self {
            detector: GoertzelDetector::new(sample_rate_hz, target_hz, block_size),
            power_threshold: 0.05,
            blocks_needed: (SUSTAIN_MS / BLOCK_MS).max(1),
            consecutive_above: 0,
            consecutive_below: 0,
            latched: false,
            tone_count: 0,
        }
    }

    /// Feeds one demodulated audio sample. Returns whether the latch is
    /// currently open (tone confirmed present).
    pub fn process(&mut self, sample: f32) -> bool {
        if let Some(power) = self.detector.process(sample) {
            if power >= self.power_threshold {
                self.consecutive_above += 1;
                self.consecutive_below = 0;
                if !self.latched && self.consecutive_above >= self.blocks_needed {
                    self.latched = true;
                    self.tone_count += 1;
                }
            } else {
                self.consecutive_below += 1;
                self.consecutive_above = 0;
                if self.latched && self.consecutive_below >= self.blocks_needed {
                    self.latched = false;
                }
            }
        }
        self.latched
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(sample_rate: u32, hz: f32, n: usize) -> impl Iterator<Item = f32> {
        (0..n).map(move |i| (2.0 * PI * hz * i as f32 / sample_rate as f32).sin() * 0.5)
    }

    #[test]
    fn matching_tone_latches_after_sustain_window() {
        let sample_rate = 8_000;
        let mut gate = CtcssGate::new(sample_rate, 100.0);
        let mut latched_at = None;
        for (i, s) in tone(sample_rate, 100.0, sample_rate as usize).enumerate() {
            if gate.process(s) {
                latched_at = Some(i);
                break;
            }
        }
        assert!(latched_at.is_some());
        assert_eq!(gate.tone_count, 1);
    }

    #[test]
    fn off_frequency_tone_never_latches() {
        let sample_rate = 8_000;
        let mut gate = CtcssGate::new(sample_rate, 100.0);
        for s in tone(sample_rate, 400.0, sample_rate as usize) {
            gate.process(s);
        }
        assert!(!gate.is_latched());
        assert_eq!(gate.tone_count, 0);
    }
}
