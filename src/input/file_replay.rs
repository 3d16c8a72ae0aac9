//! File-replay IQ source: reads raw interleaved complex-float32 samples from
//! a capture file, optionally pacing reads to real time via `speedup_factor`.
//!
//! Grounded in airjedi-desktop's `iq_processor.rs`, which establishes the
//! raw `.cf32`/`.iq` interleaved-float32 convention and a synthetic-tone
//! file generator (`create_test_iq_file`) used here for tests.

use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::info;

use super::IqSource;
use crate::error::SkywaveError;

const BLOCK_SAMPLES: usize = 8192; // interleaved floats (4096 I/Q pairs)

pub struct FileReplaySource {
    device_label: String,
    path: PathBuf,
    sample_rate_hz: u32,
    speedup_factor: f64,
    file: Option<File>,
    read_buf: Vec<u8>,
}

impl FileReplaySource {
    pub fn new(device_label: impl Into<String>, path: PathBuf, sample_rate_hz: u32, speedup_factor: f64) -> Self {
        Self {
            device_label: device_label.into(),
            path,
            sample_rate_hz,
            speedup_factor: speedup_factor.max(0.001),
            file: None,
            read_buf: vec![0u8; BLOCK_SAMPLES * 4],
        }
    }
}

#[async_trait]
impl IqSource for FileReplaySource {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        let file = File::open(&self.path).await.map_err(|e| SkywaveError::DeviceInit {
            device: self.device_label.clone(),
            reason: format!("failed to open replay file {}: {e}", self.path.display()),
        })?;
        info!(device = %self.device_label, path = %self.path.display(), "opened replay file");
        self.file = Some(file);
        Ok(())
    }

    async fn read_into(&mut self, out: &mut Vec<f32>) -> Result<usize, SkywaveError> {
        let file = self.file.as_mut().ok_or_else(|| SkywaveError::InputFatal {
            device: self.device_label.clone(),
            reason: "read_into called before open".to_string(),
        })?;

        let n = file.read(&mut self.read_buf).await.map_err(|e| SkywaveError::InputTransient {
            device: self.device_label.clone(),
            reason: e.to_string(),
        })?;

        if n == 0 {
            return Err(SkywaveError::EndOfStream {
                device: self.device_label.clone(),
            });
        }

        let whole_samples = n - (n % 4);
        out.clear();
        out.extend(
            self.read_buf[..whole_samples]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );

        let pair_count = out.len() / 2;
        if pair_count > 0 {
            let real_duration = std::time::Duration::from_secs_f64(pair_count as f64 / self.sample_rate_hz as f64);
            let paced_duration = real_duration.div_f64(self.speedup_factor);
            tokio::time::sleep(paced_duration).await;
        }

        Ok(out.len())
    }

    async fn close(&mut self) {
        if self.file.take().is_some() {
            info!(device = %self.device_label, "closed replay file");
        }
    }
}

/// Seeks a replay file back to the start, used by `continuous` file-replay
/// devices that loop rather than stopping at EOF.
pub async fn rewind(source: &mut FileReplaySource) -> Result<(), SkywaveError> {
    if let Some(file) = source.file.as_mut() {
        file.seek(SeekFrom::Start(0)).await.map_err(|e| SkywaveError::InputTransient {
            device: source.device_label.clone(),
            reason: format!("rewind failed: {e}"),
        })?;
    }
    Ok(())
}

/// Writes a synthetic IQ capture: `n` tones summed and normalized, matching
/// airjedi-desktop's `create_test_iq_file` helper. Used by integration tests
/// to generate deterministic single/multi-tone fixtures.
pub fn write_test_iq_file(
    path: &std::path::Path,
    sample_rate_hz: f64,
    duration_secs: f64,
    tone_frequencies_hz: &[f64],
) -> std::io::Result<()> {
    use std::f64::consts::PI;
    use std::io::Write;

    let num_samples = (sample_rate_hz * duration_secs) as usize;
    let mut file = std::fs::File::create(path)?;
    let scale = 1.0 / tone_frequencies_hz.len().max(1) as f64;

    for n in 0..num_samples {
        let t = n as f64 / sample_rate_hz;
        let mut i_sample = 0.0;
        let mut q_sample = 0.0;
        for &freq in tone_frequencies_hz {
            let phase = 2.0 * PI * freq * t;
            i_sample += phase.cos();
            q_sample += phase.sin();
        }
        file.write_all(&((i_sample * scale) as f32).to_le_bytes())?;
        file.write_all(&((q_sample * scale) as f32).to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_tone_then_reports_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.cf32");
        write_test_iq_file(&path, 8_000.0, 0.05, &[1_000.0]).unwrap();

        let mut src = FileReplaySource::new("dev0", path, 8_000, 1000.0);
        src.open().await.unwrap();

        let mut total = 0;
        let mut out = Vec::new();
        loop {
            match src.read_into(&mut out).await {
                Ok(n) => total += n,
                Err(SkywaveError::EndOfStream { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(total > 0);
    }

    #[tokio::test]
    async fn missing_file_is_device_init_error() {
        let mut src = FileReplaySource::new("dev0", PathBuf::from("/nonexistent/path.cf32"), 8_000, 1.0);
        assert!(matches!(src.open().await, Err(SkywaveError::DeviceInit { .. })));
    }
}
