//! Mono PCM encoders used by the file and network sinks, ported from the
//! teacher's stereo `audio/recording/encoders.rs` and simplified to the
//! single-channel case since every channel here is one audio stream.

use crate::error::SkywaveError;

pub trait AudioEncoder: Send {
    fn initialize(&mut self, sample_rate_hz: u32) -> Result<(), SkywaveError>;
    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, SkywaveError>;
    fn finalize(&mut self) -> Result<Vec<u8>, SkywaveError>;
    fn file_extension(&self) -> &'static str;
}

/// Streams a 44-byte RIFF/WAVE header up front with placeholder sizes, then
/// PCM16 frames; the header's size fields are only correct once the file is
/// closed, matching the teacher's `WavEncoder::generate_wav_header`.
pub struct WavEncoder {
    sample_rate_hz: u32,
    bytes_written: u32,
    header_emitted: bool,
}

impl WavEncoder {
    pub fn new() -> Self {
        Self {
            sample_rate_hz: 48_000,
            bytes_written: 0,
            header_emitted: false,
        }
    }

    fn header(&self) -> Vec<u8> {
        let byte_rate = self.sample_rate_hz * 2;
        let mut h = Vec::with_capacity(44);
        h.extend_from_slice(b"RIFF");
        h.extend_from_slice(&0u32.to_le_bytes()); // patched on close
        h.extend_from_slice(b"WAVE");
        h.extend_from_slice(b"fmt ");
        h.extend_from_slice(&16u32.to_le_bytes());
        h.extend_from_slice(&1u16.to_le_bytes()); // PCM
        h.extend_from_slice(&1u16.to_le_bytes()); // mono
        h.extend_from_slice(&self.sample_rate_hz.to_le_bytes());
        h.extend_from_slice(&byte_rate.to_le_bytes());
        h.extend_from_slice(&2u16.to_le_bytes()); // block align
        h.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        h.extend_from_slice(b"data");
        h.extend_from_slice(&0u32.to_le_bytes()); // patched on close
        h
    }

    fn convert_samples(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let v = (clamped * i16::MAX as f32) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

impl AudioEncoder for WavEncoder {
    fn initialize(&mut self, sample_rate_hz: u32) -> Result<(), SkywaveError> {
        self.sample_rate_hz = sample_rate_hz;
        self.bytes_written = 0;
        self.header_emitted = false;
        Ok(())
    }

    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, SkywaveError> {
        let mut out = Vec::new();
        if !self.header_emitted {
            out.extend_from_slice(&self.header());
            self.header_emitted = true;
        }
        let pcm = Self::convert_samples(samples);
        self.bytes_written += pcm.len() as u32;
        out.extend_from_slice(&pcm);
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<u8>, SkywaveError> {
        // Real RIFF size patching happens in-place on the open file handle
        // (the sink seeks back to offsets 4 and 40); nothing to flush here.
        Ok(Vec::new())
    }

    fn file_extension(&self) -> &'static str {
        "wav"
    }
}

impl Default for WavEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// SAFETY: the underlying `lame::Lame` handle is only ever touched from the
/// single task that owns this encoder; it is never shared across threads
/// concurrently, only moved.
unsafe impl Send for Mp3Encoder {}

pub struct Mp3Encoder {
    lame: Option<lame::Lame>,
    sample_rate_hz: u32,
    bitrate_kbps: u32,
}

impl Mp3Encoder {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self {
            lame: None,
            sample_rate_hz: 48_000,
            bitrate_kbps,
        }
    }
}

impl AudioEncoder for Mp3Encoder {
    fn initialize(&mut self, sample_rate_hz: u32) -> Result<(), SkywaveError> {
        self.sample_rate_hz = sample_rate_hz;
        let mut lame = lame::Lame::new().ok_or_else(|| {
            SkywaveError::Internal("failed to allocate lame encoder".to_string())
        })?;
        lame.set_channels(1).map_err(lame_err)?;
        lame.set_sample_rate(sample_rate_hz).map_err(lame_err)?;
        lame.set_kilobitrate(self.bitrate_kbps as i32).map_err(lame_err)?;
        lame.set_quality(2).map_err(lame_err)?;
        lame.init_params().map_err(lame_err)?;
        self.lame = Some(lame);
        Ok(())
    }

    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, SkywaveError> {
        let lame = self.lame.as_mut().ok_or_else(|| {
            SkywaveError::Internal("mp3 encoder used before initialize".to_string())
        })?;

        let samples_i16: Vec<i16> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();

        let mut mp3_buf = vec![0u8; samples_i16.len() * 2 + 7_200];
        let written = lame
            .encode(&samples_i16, &samples_i16, &mut mp3_buf)
            .map_err(|e| SkywaveError::Internal(format!("lame encode failed: {e:?}")))?;
        mp3_buf.truncate(written);
        Ok(mp3_buf)
    }

    fn finalize(&mut self) -> Result<Vec<u8>, SkywaveError> {
        // The `lame` crate has no flush entry point; trailing frames are
        // already out via the last encode() call.
        Ok(Vec::new())
    }

    fn file_extension(&self) -> &'static str {
        "mp3"
    }
}

fn lame_err(e: impl std::fmt::Debug) -> SkywaveError {
    SkywaveError::Internal(format!("lame config error: {e:?}"))
}

pub fn make_encoder(format: crate::config::FileFormat, bitrate_kbps: u32) -> Option<Box<dyn AudioEncoder>> {
    use crate::config::FileFormat;
    match format {
        FileFormat::Wav => Some(Box::new(WavEncoder::new())),
        FileFormat::Mp3 => Some(Box::new(Mp3Encoder::new(bitrate_kbps))),
        FileFormat::RawPcm => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_declares_mono_pcm16() {
        let mut enc = WavEncoder::new();
        enc.initialize(48_000).unwrap();
        let bytes = enc.encode(&[0.0, 0.5, -0.5]).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let num_channels = u16::from_le_bytes([bytes[22], bytes[23]]);
        assert_eq!(num_channels, 1);
        let bits_per_sample = u16::from_le_bytes([bytes[34], bytes[35]]);
        assert_eq!(bits_per_sample, 16);
    }

    #[test]
    fn wav_header_only_emitted_once() {
        let mut enc = WavEncoder::new();
        enc.initialize(48_000).unwrap();
        let first = enc.encode(&[0.0]).unwrap();
        let second = enc.encode(&[0.0]).unwrap();
        assert!(first.len() > second.len());
        assert_eq!(second.len(), 2);
    }
}
