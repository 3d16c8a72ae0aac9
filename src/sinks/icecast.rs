//! Icecast SOURCE client, ported from the teacher's
//! `audio/broadcasting/icecast_source.rs`: connects once, streams encoded
//! audio, and reconnects with exponential backoff on disconnect
//! (spec §4.4, 1s -> 30s cap).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::IcecastSinkConfig;
use crate::demod::AudioFrame;
use crate::error::SkywaveError;

use super::encoders::{AudioEncoder, Mp3Encoder};
use super::{AudioSink, Backoff, SinkStatus};

pub struct IcecastSink {
    cfg: IcecastSinkConfig,
    channel_label: String,
    stream: Option<TcpStream>,
    encoder: Mp3Encoder,
    backoff: Backoff,
    status: SinkStatus,
}

impl IcecastSink {
    pub fn new(cfg: IcecastSinkConfig, channel_label: String) -> Self {
        let bitrate = cfg.bitrate_kbps;
        Self {
            cfg,
            channel_label,
            stream: None,
            encoder: Mp3Encoder::new(bitrate),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
            status: SinkStatus::Idle,
        }
    }

    fn build_source_request(&self) -> String {
        let auth = base64::engine::general_purpose::STANDARD.encode(format!("source:{}", self.cfg.password));
        format!(
            "SOURCE {mount} HTTP/1.0\r\n\
             Authorization: Basic {auth}\r\n\
             User-Agent: skywave-core\r\n\
             Content-Type: audio/mpeg\r\n\
             Ice-Name: {name}\r\n\
             Ice-Description: channel {label}\r\n\
             Ice-Public: 0\r\n\
             Ice-Bitrate: {bitrate}\r\n\
             Ice-Channels: 1\r\n\
             Ice-Samplerate: {rate}\r\n\
             \r\n",
            mount = self.cfg.mountpoint,
            auth = auth,
            name = self.cfg.name,
            label = self.channel_label,
            bitrate = self.cfg.bitrate_kbps,
            rate = 48_000,
        )
    }

    async fn connect(&mut self) -> Result<(), SkywaveError> {
        let addr = format!("{}:{}", self.cfg.server, self.cfg.port);
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| SkywaveError::SinkTransient { sink: "icecast".into(), reason: e.to_string() })?;

        let request = self.build_source_request();
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| SkywaveError::SinkTransient { sink: "icecast".into(), reason: e.to_string() })?;

        let mut response = [0u8; 256];
        let n = stream
            .read(&mut response)
            .await
            .map_err(|e| SkywaveError::SinkTransient { sink: "icecast".into(), reason: e.to_string() })?;
        let response_text = String::from_utf8_lossy(&response[..n]);

        if !(response_text.contains("200 OK") || response_text.contains("HTTP/1.0 200")) {
            return Err(SkywaveError::SinkTransient {
                sink: "icecast".into(),
                reason: format!("server rejected SOURCE request: {}", response_text.trim()),
            });
        }

        self.encoder.initialize(48_000)?;
        self.stream = Some(stream);
        self.backoff.reset();
        Ok(())
    }
}

#[async_trait]
impl AudioSink for IcecastSink {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        match self.connect().await {
            Ok(()) => {
                self.status = SinkStatus::Active;
                Ok(())
            }
            Err(e) => {
                self.status = SinkStatus::Error(e.to_string());
                // The connect failure is transient from the channel's point of
                // view: accept() will retry on the next frame.
                Ok(())
            }
        }
    }

    async fn accept(&mut self, frame: &AudioFrame) -> Result<(), SkywaveError> {
        if self.stream.is_none() {
            if let Err(e) = self.connect().await {
                self.status = SinkStatus::Error(e.to_string());
                tokio::time::sleep(self.backoff.next_delay()).await;
                return Ok(());
            }
        }

        let bytes = self.encoder.encode(&frame.samples)?;
        let write_result = if let Some(stream) = self.stream.as_mut() {
            stream.write_all(&bytes).await
        } else {
            return Ok(());
        };

        match write_result {
            Ok(()) => {
                self.status = SinkStatus::Active;
                Ok(())
            }
            Err(e) => {
                self.stream = None;
                self.status = SinkStatus::Error(e.to_string());
                Err(SkywaveError::SinkTransient { sink: "icecast".into(), reason: e.to_string() })
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SkywaveError> {
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.flush().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SkywaveError> {
        self.stream = None;
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

    fn cfg() -> IcecastSinkConfig {
        IcecastSinkConfig {
            server: "localhost".to_string(),
            port: 8000,
            mountpoint: "/tower1".to_string(),
            password: "hackme".to_string(),
            name: "skywave".to_string(),
            bitrate_kbps: 64,
        }
    }

    #[test]
    fn source_request_carries_basic_auth_and_mount() {
        let sink = IcecastSink::new(cfg(), "tower1".to_string());
        let req = sink.build_source_request();
        assert!(req.starts_with("SOURCE /tower1 HTTP/1.0"));
        assert!(req.contains("Authorization: Basic"));
        assert!(req.contains("Ice-Bitrate: 64"));
    }
}
