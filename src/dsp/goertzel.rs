//! Streaming Goertzel tone detector, used for CTCSS sub-audible tone
//! detection (spec §4.3). Block form grounded on the `goertzel_power` helper
//! in voxterm's audio test suite, adapted from a one-shot block computation
//! to a running detector that re-evaluates every `block_size` samples.

pub struct GoertzelDetector {
    coeff: f32,
    q1: f32,
    q2: f32,
    count: usize,
    block_size: usize,
}

impl GoertzelDetector {
    pub fn new(sample_rate: u32, target_hz: f32, block_size: usize) -> Self {
        let normalized_freq = target_hz / sample_rate as f32;
        let omega = 2.0 * std::f32::consts::PI * normalized_freq;
        Self {
            coeff: 2.0 * omega.cos(),
            q1: 0.0,
            q2: 0.0,
            count: 0,
            block_size: block_size.max(1),
        }
    }

    /// Feeds one sample; returns `Some(power)` whenever a full block has
    /// been accumulated, resetting the running sums.
    pub fn process(&mut self, sample: f32) -> Option<f32> {
        let q0 = self.coeff * self.q1 - self.q2 + sample;
        self.q2 = self.q1;
        self.q1 = q0;
        self.count += 1;

        if self.count >= self.block_size {
            let power = (self.q1 * self.q1 + self.q2 * self.q2 - self.coeff * self.q1 * self.q2).max(0.0)
                / self.block_size as f32;
            self.q1 = 0.0;
            self.q2 = 0.0;
            self.count = 0;
            Some(power)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn detects_matching_tone() {
        let sample_rate = 8_000;
        let mut det = GoertzelDetector::new(sample_rate, 100.0, 800);
        let mut last_power = 0.0;
        for n in 0..800 {
            let s = (2.0 * PI * 100.0 * n as f32 / sample_rate as f32).sin();
            if let Some(p) = det.process(s) {
                last_power = p;
            }
        }
        assert!(last_power > 0.1);
    }

    #[test]
    fn rejects_off_frequency_tone() {
        let sample_rate = 8_000;
        let mut det = GoertzelDetector::new(sample_rate, 100.0, 800);
        let mut last_power = 1.0;
        for n in 0..800 {
            let s = (2.0 * PI * 400.0 * n as f32 / sample_rate as f32).sin();
            if let Some(p) = det.process(s) {
                last_power = p;
            }
        }
        assert!(last_power < 0.05);
    }
}
