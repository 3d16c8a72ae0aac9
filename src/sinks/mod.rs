//! Output fan-out (spec §4.4): each channel owns an ordered list of sinks,
//! each polymorphic over one capability interface (spec §9 design note).
//! Every sink variant owns its own state machine and runs on its own
//! cooperative task so a slow sink never backs up the demodulator.

pub mod encoders;
pub mod file;
pub mod http_api;
pub mod icecast;
pub mod redis;
pub mod udp;

use async_trait::async_trait;

use crate::demod::AudioFrame;
use crate::error::SkywaveError;

/// Default consecutive-retry ceiling before a sink's failure becomes
/// metric-visible without terminating the channel (spec §4.4).
pub const MAX_CONSECUTIVE_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkStatus {
    Idle,
    Active,
    Error(String),
}

/// Capability interface shared by every sink variant (spec §9).
#[async_trait]
pub trait AudioSink: Send {
    async fn open(&mut self) -> Result<(), SkywaveError>;

    /// Accepts one audio frame batch. Non-blocking: if the sink's internal
    /// queue is saturated the frame is dropped and a counter incremented,
    /// the pipeline is never blocked on a slow sink.
    async fn accept(&mut self, frame: &AudioFrame) -> Result<(), SkywaveError>;

    async fn flush(&mut self) -> Result<(), SkywaveError>;

    async fn close(&mut self) -> Result<(), SkywaveError>;

    fn status(&self) -> SinkStatus;
}

/// Exponential backoff shared by every sink's reconnect logic (Icecast
/// 1s -> 30s cap per spec §4.4; other sinks reuse the same shape at shorter
/// bounds).
pub struct Backoff {
    base: std::time::Duration,
    cap: std::time::Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: std::time::Duration, cap: std::time::Duration) -> Self {
        Self { base, cap, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> std::time::Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
