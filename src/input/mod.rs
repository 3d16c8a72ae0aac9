//! Input stage (spec §4.1): drives one device-kind-specific source, converts
//! whatever native sample format it produces to interleaved float32 in
//! `[-1.0, 1.0]`, DC-blocks I and Q separately, and feeds the result into the
//! device's [`ring_buffer`].

pub mod file_replay;
pub mod ring_buffer;
pub mod usb_sdr;

use async_trait::async_trait;

use crate::error::SkywaveError;

/// Driver-agnostic source contract (spec §4.1 public contract), implemented
/// by [`file_replay::FileReplaySource`] and [`usb_sdr::UsbSdrSource`].
#[async_trait]
pub trait IqSource: Send {
    /// Configures sample rate, center frequency, gain, correction and opens
    /// the underlying device/file.
    async fn open(&mut self) -> Result<(), SkywaveError>;

    /// Reads as many samples as are immediately available (or one pacing
    /// step, for file replay) into `out` as interleaved I/Q float32.
    /// Non-blocking when the driver allows it.
    async fn read_into(&mut self, out: &mut Vec<f32>) -> Result<usize, SkywaveError>;

    /// Releases driver state. Idempotent.
    async fn close(&mut self);
}

/// Normalizes one interleaved-float32 I/Q block with a per-channel DC
/// blocker (spec §4.1 algorithm), in place.
pub struct IqNormalizer {
    dc_i: crate::dsp::dc_blocker::DcBlocker,
    dc_q: crate::dsp::dc_blocker::DcBlocker,
}

impl IqNormalizer {
    pub fn new() -> Self {
        Self {
            dc_i: crate::dsp::dc_blocker::DcBlocker::new(0.999),
            dc_q: crate::dsp::dc_blocker::DcBlocker::new(0.999),
        }
    }

    pub fn process(&mut self, interleaved: &mut [f32]) {
        for pair in interleaved.chunks_exact_mut(2) {
            pair[0] = self.dc_i.process(pair[0]);
            pair[1] = self.dc_q.process(pair[1]);
        }
    }
}

/// Converts signed 16-bit native samples (the common USB SDR wire format)
/// to interleaved float32 in `[-1.0, 1.0]`.
pub fn i16_to_f32_interleaved(raw: &[i16], out: &mut Vec<f32>) {
    out.clear();
    out.extend(raw.iter().map(|&s| s as f32 / i16::MAX as f32));
}

/// Converts unsigned 8-bit native samples (rtl-sdr's native format, centered
/// on 127.5) to interleaved float32 in `[-1.0, 1.0]`.
pub fn u8_to_f32_interleaved(raw: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(raw.iter().map(|&s| (s as f32 - 127.5) / 127.5));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_blocker_removes_offset_on_both_channels() {
        let mut norm = IqNormalizer::new();
        let mut block = vec![0.3f32, -0.2]; // I, Q repeated with a DC offset
        block = block.iter().cycle().take(20_000).copied().collect();
        norm.process(&mut block);
        let tail = &block[block.len() - 4..];
        for &s in tail {
            assert!(s.abs() < 0.05);
        }
    }

    #[test]
    fn u8_conversion_centers_on_zero() {
        let mut out = Vec::new();
        u8_to_f32_interleaved(&[127, 128, 0, 255], &mut out);
        assert!(out[0].abs() < 0.01);
        assert!((out[2] - (-1.0)).abs() < 0.01);
        assert!((out[3] - 1.0).abs() < 0.01);
    }
}
