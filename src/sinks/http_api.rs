//! HTTP API sink (spec §4.4, §6): fire-and-forget JSON POST of each audible
//! batch, retried with a short fixed backoff budget before the failure
//! becomes metric-visible.

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;

use crate::config::HttpApiSinkConfig;
use crate::demod::AudioFrame;
use crate::error::SkywaveError;

use super::{AudioSink, SinkStatus};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

#[derive(Serialize)]
struct AudioPayload {
    channel: u32,
    frequency_hz: u64,
    start_ts: u64,
    end_ts: u64,
    sample_rate_hz: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_count: Option<usize>,
}

pub struct HttpApiSink {
    cfg: HttpApiSinkConfig,
    freq_hz: u64,
    client: Option<reqwest::Client>,
    status: SinkStatus,
}

impl HttpApiSink {
    pub fn new(cfg: HttpApiSinkConfig, freq_hz: u64) -> Self {
        Self {
            cfg,
            freq_hz,
            client: None,
            status: SinkStatus::Idle,
        }
    }

    fn payload(&self, frame: &AudioFrame) -> AudioPayload {
        let batch_duration_ms =
            (frame.samples.len() as u64 * 1000) / frame.sample_rate_hz.max(1) as u64;
        let start_ts = frame.timestamp_unix_ms.saturating_sub(batch_duration_ms);

        let (audio_base64, sample_count) = if self.cfg.inline_audio {
            let pcm: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            (Some(base64::engine::general_purpose::STANDARD.encode(pcm)), None)
        } else {
            (None, Some(frame.samples.len()))
        };

        AudioPayload {
            channel: frame.channel_index,
            frequency_hz: self.freq_hz,
            start_ts,
            end_ts: frame.timestamp_unix_ms,
            sample_rate_hz: frame.sample_rate_hz,
            audio_base64,
            sample_count,
        }
    }
}

#[async_trait]
impl AudioSink for HttpApiSink {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        self.client = Some(reqwest::Client::new());
        self.status = SinkStatus::Active;
        Ok(())
    }

    async fn accept(&mut self, frame: &AudioFrame) -> Result<(), SkywaveError> {
        if !frame.squelch_open {
            return Ok(());
        }
        let client = self.client.as_ref().ok_or_else(|| SkywaveError::SinkFatal {
            sink: "http_api".into(),
            reason: "client not open".into(),
        })?;

        let payload = self.payload(frame);
        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            match client.post(&self.cfg.endpoint_url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    self.status = SinkStatus::Active;
                    return Ok(());
                }
                Ok(resp) => {
                    last_err = Some(format!("http status {}", resp.status()));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                }
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(std::time::Duration::from_millis(BASE_BACKOFF_MS * (attempt as u64 + 1)))
                    .await;
            }
        }

        let reason = last_err.unwrap_or_else(|| "unknown error".to_string());
        self.status = SinkStatus::Error(reason.clone());
        Err(SkywaveError::SinkTransient { sink: "http_api".into(), reason })
    }

    async fn flush(&mut self) -> Result<(), SkywaveError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SkywaveError> {
        self.client = None;
        self.status = SinkStatus::Idle;
        Ok(())
    }

    fn status(&self) -> SinkStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_omits_audio_when_not_inline() {
        let sink = HttpApiSink::new(
            HttpApiSinkConfig { endpoint_url: "http://localhost/audio".to_string(), inline_audio: false },
            118_500_000,
        );
        let frame = AudioFrame {
            channel_index: 1,
            samples: vec![0.0; 480],
            sample_rate_hz: 48_000,
            timestamp_unix_ms: 10_000,
            squelch_open: true,
        };
        let payload = sink.payload(&frame);
        assert!(payload.audio_base64.is_none());
        assert_eq!(payload.sample_count, Some(480));
    }

    #[test]
    fn payload_inlines_audio_when_requested() {
        let sink = HttpApiSink::new(
            HttpApiSinkConfig { endpoint_url: "http://localhost/audio".to_string(), inline_audio: true },
            118_500_000,
        );
        let frame = AudioFrame {
            channel_index: 1,
            samples: vec![0.0; 10],
            sample_rate_hz: 48_000,
            timestamp_unix_ms: 10_000,
            squelch_open: true,
        };
        let payload = sink.payload(&frame);
        assert!(payload.audio_base64.is_some());
    }
}
