//! Redis pub/sub sink (spec §4.4, §6): publishes each audible batch to
//! `radio:{channel_label}` as `{meta, pcm_b64}`. One connection per sink,
//! reconnected lazily on the next accept() after a failure.

use async_trait::async_trait;
use base64::Engine;
use redis::AsyncCommands;
use serde::Serialize;

use crate::config::RedisSinkConfig;
use crate::demod::AudioFrame;
use crate::error::SkywaveError;

use super::{AudioSink, SinkStatus};

#[derive(Serialize)]
struct Meta {
    channel: u32,
    sample_rate_hz: u32,
    timestamp_unix_ms: u64,
    squelch_open: bool,
}

#[derive(Serialize)]
struct Envelope {
    meta: Meta,
    pcm_b64: String,
}

pub struct RedisSink {
    cfg: RedisSinkConfig,
    channel_label: String,
    client: Option<redis::Client>,
    connection: Option<redis::aio::MultiplexedConnection>,
    status: SinkStatus,
}

impl RedisSink {
    pub fn new(cfg: RedisSinkConfig, channel_label: String) -> Self {
        Self {
            cfg,
            channel_label,
            client: None,
            connection: None,
            status: SinkStatus::Idle,
        }
    }

    fn topic(&self) -> String {
        format!("radio:{}", self.channel_label)
    }

    async fn ensure_connected(&mut self) -> Result<(), SkywaveError> {
        if self.connection.is_some() {
            return Ok(());
        }
        let client = match &self.client {
            Some(c) => c.clone(),
            None => {
                let c = redis::Client::open(self.cfg.connection_url.as_str())
                    .map_err(|e| SkywaveError::SinkFatal { sink: "redis".into(), reason: e.to_string() })?;
                self.client = Some(c.clone());
                c
            }
        };
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SkywaveError::SinkTransient { sink: "redis".into(), reason: e.to_string() })?;
        self.connection = Some(conn);
        Ok(())
    }
}

#[async_trait]
impl AudioSink for RedisSink {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        let client = redis::Client::open(self.cfg.connection_url.as_str())
            .map_err(|e| SkywaveError::SinkFatal { sink: "redis".into(), reason: e.to_string() })?;
        self.client = Some(client);
        if let Err(e) = self.ensure_connected().await {
            self.status = SinkStatus::Error(e.to_string());
            return Ok(());
        }
        self.status = SinkStatus::Active;
        Ok(())
    }

    async fn accept(&mut self, frame: &AudioFrame) -> Result<(), SkywaveError> {
        if !frame.squelch_open {
            return Ok(());
        }

        if let Err(e) = self.ensure_connected().await {
            self.status = SinkStatus::Error(e.to_string());
            return Ok(());
        }

        let pcm: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let envelope = Envelope {
            meta: Meta {
                channel: frame.channel_index,
                sample_rate_hz: frame.sample_rate_hz,
                timestamp_unix_ms: frame.timestamp_unix_ms,
                squelch_open: frame.squelch_open,
            },
            pcm_b64: base64::engine::general_purpose::STANDARD.encode(pcm),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| SkywaveError::Internal(format!("redis payload encoding failed: {e}")))?;

        let topic = self.topic();
        let conn = self.connection.as_mut().ok_or_else(|| SkywaveError::SinkFatal {
            sink: "redis".into(),
            reason: "connection not open".into(),
        })?;

        match conn.publish::<_, _, i64>(topic, payload).await {
            Ok(_) => {
                self.status = SinkStatus::Active;
                Ok(())
            }
            Err(e) => {
                self.connection = None;
                self.status = SinkStatus::Error(e.to_string());
                Err(SkywaveError::SinkTransient { sink: "redis".into(), reason: e.to_string() })
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SkywaveError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SkywaveError> {
        self.connection = None;
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
    fn topic_derived_from_channel_label() {
        let sink = RedisSink::new(
            RedisSinkConfig { connection_url: "redis://localhost".to_string() },
            "tower1".to_string(),
        );
        assert_eq!(sink.topic(), "radio:tower1");
    }
}
