//! Automatic frequency control (spec §4.3): every `afc_steps` audio frames,
//! estimate the residual tone offset from the average phase slope of the
//! complex baseband and report a bounded correction. The pipeline feeds this
//! back into the channelizer's bin selection for the next batch; this module
//! only computes the estimate.

use num_complex::Complex32;

pub struct AfcTracker {
    steps: u32,
    frames_seen: u32,
    phase_accum: f32,
    sample_count: usize,
    baseband_rate_hz: f32,
    max_offset_hz: f32,
    current_offset_hz: f32,
}

impl AfcTracker {
    /// `bin_hz` bounds the correction to +/- half a wideband FFT bin, per
    /// spec §4.3 ("Bounded to +/- 1/2 bin").
    pub fn new(steps: u32, baseband_rate_hz: u32, bin_hz: f32) -> Self {
        Self {
            steps: steps.max(1),
            frames_seen: 0,
            phase_accum: 0.0,
            sample_count: 0,
            baseband_rate_hz: baseband_rate_hz as f32,
            max_offset_hz: bin_hz / 2.0,
            current_offset_hz: 0.0,
        }
    }

    /// Observes one channelizer batch of complex baseband (pre-demod)
    /// samples. Call once per audio frame/batch.
    pub fn observe_batch(&mut self, samples: &[Complex32]) {
        for pair in samples.windows(2) {
            let rotation = pair[1] * pair[0].conj();
            self.phase_accum += rotation.arg();
            self.sample_count += 1;
        }
        self.frames_seen += 1;

        if self.frames_seen >= self.steps {
            if self.sample_count > 0 {
                let avg_phase_per_sample = self.phase_accum / self.sample_count as f32;
                let offset_hz = avg_phase_per_sample / std::f32::consts::TAU * self.baseband_rate_hz;
                self.current_offset_hz = offset_hz.clamp(-self.max_offset_hz, self.max_offset_hz);
            }
            self.phase_accum = 0.0;
            self.sample_count = 0;
            self.frames_seen = 0;
        }
    }

    /// Latest estimated offset in Hz, bounded to +/- half a bin.
    pub fn offset_hz(&self) -> f32 {
        self.current_offset_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone_block(sample_rate: u32, freq_hz: f32, n: usize, start_phase: f32) -> (Vec<Complex32>, f32) {
        let mut phase = start_phase;
        let step = TAU * freq_hz / sample_rate as f32;
        let samples = (0..n)
            .map(|_| {
                let s = Complex32::new(phase.cos(), phase.sin());
                phase += step;
                s
            })
            .collect();
        (samples, phase)
    }

    #[test]
    fn estimates_small_offset_within_bound() {
        let sample_rate = 48_000;
        let bin_hz = 200.0;
        let mut afc = AfcTracker::new(1, sample_rate, bin_hz);
        let (block, _) = tone_block(sample_rate, 30.0, 4_096, 0.0);
        afc.observe_batch(&block);
        assert!((afc.offset_hz() - 30.0).abs() < 2.0);
    }

    #[test]
    fn offset_is_clamped_to_half_bin() {
        let sample_rate = 48_000;
        let bin_hz = 40.0; // half-bin = 20 Hz, well under the 5 kHz tone offset
        let mut afc = AfcTracker::new(1, sample_rate, bin_hz);
        let (block, _) = tone_block(sample_rate, 5_000.0, 4_096, 0.0);
        afc.observe_batch(&block);
        assert!(afc.offset_hz().abs() <= bin_hz / 2.0 + 0.01);
    }
}
