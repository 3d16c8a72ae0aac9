//! Narrow-band FM quadrature discriminator (spec §4.3 NFM path).

use num_complex::Complex32;

use crate::dsp::biquad::BiquadFilter;
use crate::dsp::fast_atan2;

const DEFAULT_DEEMPHASIS_TAU_US: f32 = 50.0;

pub struct NfmDemodulator {
    prev_i: f32,
    prev_q: f32,
    deemph_coeff: f32,
    deemph_state: f32,
    highpass: BiquadFilter,
    lowpass: BiquadFilter,
    notch: Option<BiquadFilter>,
    amp_factor: f32,
}

impl NfmDemodulator {
    pub fn new(
        sample_rate_hz: u32,
        highpass_hz: f32,
        lowpass_hz: f32,
        notch_hz: f32,
        notch_q: f32,
        amp_factor: f32,
    ) -> Self {
        let tau_s = DEFAULT_DEEMPHASIS_TAU_US * 1e-6;
        Self {
            prev_i: 0.0,
            prev_q: 0.0,
            deemph_coeff: 1.0 - (-1.0 / (tau_s * sample_rate_hz as f32)).exp(),
            deemph_state: 0.0,
            highpass: BiquadFilter::high_pass(sample_rate_hz, highpass_hz, std::f32::consts::FRAC_1_SQRT_2),
            lowpass: BiquadFilter::low_pass(sample_rate_hz, lowpass_hz, std::f32::consts::FRAC_1_SQRT_2),
            notch: (notch_hz > 0.0).then(|| BiquadFilter::notch(sample_rate_hz, notch_hz, notch_q)),
            amp_factor,
        }
    }

    /// Demodulates one complex baseband sample to one audio sample.
    pub fn process(&mut self, iq: Complex32) -> f32 {
        let i = iq.re;
        let q = iq.im;

        let cross_real = i * self.prev_i + q * self.prev_q;
        let cross_imag = q * self.prev_i - i * self.prev_q;
        let phase_diff = fast_atan2(cross_imag, cross_real);
        self.prev_i = i;
        self.prev_q = q;

        let mut sample = phase_diff / std::f32::consts::PI;

        self.deemph_state += self.deemph_coeff * (sample - self.deemph_state);
        sample = self.deemph_state;

        sample = self.highpass.process(sample);
        sample = self.lowpass.process(sample);
        if let Some(notch) = &mut self.notch {
            sample = notch.process(sample);
        }
        sample * self.amp_factor
    }

    pub fn is_unstable(&self) -> bool {
        !self.deemph_state.is_finite()
            || self.highpass.is_unstable()
            || self.lowpass.is_unstable()
            || self.notch.as_ref().is_some_and(BiquadFilter::is_unstable)
    }

    pub fn reset(&mut self) {
        self.prev_i = 0.0;
        self.prev_q = 0.0;
        self.deemph_state = 0.0;
        self.highpass.reset();
        self.lowpass.reset();
        if let Some(notch) = &mut self.notch {
            notch.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    #[test]
    fn constant_offset_tone_produces_steady_nonzero_output() {
        let sample_rate = 48_000;
        let mut demod = NfmDemodulator::new(sample_rate, 300.0, 3_000.0, 0.0, 10.0, 1.0);
        let offset_hz = 1_000.0;
        let step = TAU * offset_hz / sample_rate as f32;
        let mut phase = 0.0f32;
        let mut last = 0.0;
        for _ in 0..sample_rate {
            let iq = Complex32::new(phase.cos(), phase.sin());
            phase += step;
            last = demod.process(iq);
        }
        assert!(last.abs() > 0.01);
        assert!(!demod.is_unstable());
    }

    #[test]
    fn zero_offset_settles_near_zero() {
        let sample_rate = 8_000;
        let mut demod = NfmDemodulator::new(sample_rate, 300.0, 3_000.0, 0.0, 10.0, 1.0);
        let mut last = 1.0;
        for _ in 0..sample_rate {
            last = demod.process(Complex32::new(1.0, 0.0));
        }
        assert!(last.abs() < 0.05);
    }
}
