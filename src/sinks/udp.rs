//! UDP stream sink (spec §4.4, §6 wire format): fans demodulated audio out
//! as datagrams, optionally chunked to a safe MTU and tagged with a small
//! header so a receiver can detect drops and reassemble.

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::config::UdpSinkConfig;
use crate::demod::AudioFrame;
use crate::error::SkywaveError;

use super::encoders::{AudioEncoder, Mp3Encoder};
use super::{AudioSink, SinkStatus};

/// 4-byte magic identifying this wire format, followed by a u16 sequence
/// number and a u16 flags field (bit 0 set when the payload is MP3).
const MAGIC: &[u8; 4] = b"BAIR";
const FLAG_MP3: u16 = 0x0001;

/// Conservative payload ceiling keeping whole datagrams under typical
/// Ethernet MTU once the header and IP/UDP overhead are accounted for.
const MAX_PAYLOAD_BYTES: usize = 1200;

pub struct UdpSink {
    cfg: UdpSinkConfig,
    socket: Option<UdpSocket>,
    dest: String,
    seq: u16,
    mp3_encoder: Option<Mp3Encoder>,
    status: SinkStatus,
}

impl UdpSink {
    pub fn new(cfg: UdpSinkConfig, default_port: u16) -> Self {
        let port = cfg.dest_port.unwrap_or(default_port);
        let dest = format!("{}:{}", cfg.dest_address, port);
        let mp3_encoder = cfg.as_mp3.then(|| Mp3Encoder::new(64));
        Self {
            cfg,
            socket: None,
            dest,
            seq: 0,
            mp3_encoder,
            status: SinkStatus::Idle,
        }
    }

    fn frame_header(&self, flags: u16) -> [u8; 8] {
        let mut header = [0u8; 8];
        header[0..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&self.seq.to_le_bytes());
        header[6..8].copy_from_slice(&flags.to_le_bytes());
        header
    }

    async fn send_payload(&mut self, payload: &[u8], flags: u16) -> Result<(), SkywaveError> {
        let socket = self.socket.as_ref().ok_or_else(|| SkywaveError::SinkFatal {
            sink: "udp".into(),
            reason: "socket not open".into(),
        })?;

        let chunks: Vec<&[u8]> = if self.cfg.udp_chunking {
            payload.chunks(MAX_PAYLOAD_BYTES).collect()
        } else {
            vec![payload]
        };

        for chunk in chunks {
            let mut datagram = Vec::with_capacity(8 + chunk.len());
            if self.cfg.udp_headers {
                datagram.extend_from_slice(&self.frame_header(flags));
            }
            datagram.extend_from_slice(chunk);

            socket
                .send_to(&datagram, &self.dest)
                .await
                .map_err(|e| SkywaveError::SinkTransient { sink: "udp".into(), reason: e.to_string() })?;
            self.seq = self.seq.wrapping_add(1);
        }
        Ok(())
    }
}

#[async_trait]
impl AudioSink for UdpSink {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| SkywaveError::SinkFatal { sink: "udp".into(), reason: e.to_string() })?;
        self.socket = Some(socket);
        if let Some(enc) = self.mp3_encoder.as_mut() {
            enc.initialize(48_000)?;
        }
        self.status = SinkStatus::Active;
        Ok(())
    }

    async fn accept(&mut self, frame: &AudioFrame) -> Result<(), SkywaveError> {
        if !self.cfg.continuous && !frame.squelch_open {
            return Ok(());
        }

        let result = if let Some(enc) = self.mp3_encoder.as_mut() {
            let bytes = enc.encode(&frame.samples)?;
            self.send_payload(&bytes, FLAG_MP3).await
        } else {
            let pcm: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            self.send_payload(&pcm, 0).await
        };

        if let Err(ref e) = result {
            self.status = SinkStatus::Error(e.to_string());
        } else {
            self.status = SinkStatus::Active;
        }
        result
    }

    async fn flush(&mut self) -> Result<(), SkywaveError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SkywaveError> {
        self.socket = None;
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
    fn header_carries_magic_and_sequence() {
        let sink = UdpSink::new(
            UdpSinkConfig {
                dest_address: "127.0.0.1".to_string(),
                dest_port: Some(6001),
                as_mp3: false,
                udp_headers: true,
                udp_chunking: true,
                continuous: false,
            },
            6001,
        );
        let header = sink.frame_header(FLAG_MP3);
        assert_eq!(&header[0..4], MAGIC);
        assert_eq!(u16::from_le_bytes([header[6], header[7]]), FLAG_MP3);
    }

    #[test]
    fn default_port_used_when_unset() {
        let sink = UdpSink::new(
            UdpSinkConfig {
                dest_address: "127.0.0.1".to_string(),
                dest_port: None,
                as_mp3: false,
                udp_headers: true,
                udp_chunking: true,
                continuous: false,
            },
            6005,
        );
        assert_eq!(sink.dest, "127.0.0.1:6005");
    }
}
