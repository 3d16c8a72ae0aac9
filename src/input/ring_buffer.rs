//! Per-device circular IQ sample buffer.
//!
//! Grounded directly in `AudioInputStream`'s `rtrb::{Producer, Consumer}` +
//! `Arc<Notify>` pairing (`audio/mixer/stream_management/audio_input_stream.rs`):
//! the driver callback owns the `rtrb` producer, the channelizer task owns
//! the consumer, and a shared `Notify` wakes the consumer without polling.
//! Capacity is sized so worst-case FFT-frame latency stays bounded to
//! `~2 * fft_size / sample_rate_hz` (spec §4.1).

use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};
use tokio::sync::Notify;

pub struct IqRingProducer {
    producer: Producer<f32>,
    notifier: Arc<Notify>,
}

pub struct IqRingConsumer {
    consumer: Consumer<f32>,
    notifier: Arc<Notify>,
}

/// Interleaved-float32 I/Q ring sized to `2 * fft_size` samples per I/Q
/// component (`4 * fft_size` raw floats), matching the input stage's
/// latency bound.
pub fn channel(fft_size: usize) -> (IqRingProducer, IqRingConsumer) {
    let capacity = (4 * fft_size).next_power_of_two();
    let (producer, consumer) = RingBuffer::<f32>::new(capacity);
    let notifier = Arc::new(Notify::new());
    (
        IqRingProducer {
            producer,
            notifier: notifier.clone(),
        },
        IqRingConsumer { consumer, notifier },
    )
}

impl IqRingProducer {
    /// Pushes interleaved I/Q floats, returning the number actually written
    /// (fewer than requested when the ring is full -- the caller counts
    /// that as backpressure, not an error).
    pub fn push_interleaved(&mut self, samples: &[f32]) -> usize {
        let mut written = 0;
        for &s in samples {
            if self.producer.push(s).is_err() {
                break;
            }
            written += 1;
        }
        if written > 0 {
            self.notifier.notify_one();
        }
        written
    }

    pub fn slots_free(&self) -> usize {
        self.producer.slots()
    }
}

impl IqRingConsumer {
    /// Drains up to `max` interleaved floats into `out`, returning the count
    /// read. Non-blocking.
    pub fn drain_into(&mut self, out: &mut Vec<f32>, max: usize) -> usize {
        let mut read = 0;
        while read < max {
            match self.consumer.pop() {
                Ok(sample) => {
                    out.push(sample);
                    read += 1;
                }
                Err(_) => break,
            }
        }
        read
    }

    /// Waits until the producer signals new data, or returns immediately if
    /// samples are already available.
    pub async fn wait_for_data(&self) {
        if self.consumer.slots() > 0 {
            return;
        }
        self.notifier.notified().await;
    }

    pub fn slots_available(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_roundtrips() {
        let (mut tx, mut rx) = channel(64);
        let written = tx.push_interleaved(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(written, 4);
        let mut out = Vec::new();
        let read = rx.drain_into(&mut out, 10);
        assert_eq!(read, 4);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn push_past_capacity_reports_partial_write() {
        let (mut tx, _rx) = channel(1);
        let capacity = 4; // next_power_of_two(4*1)
        let samples = vec![0.0f32; capacity * 2];
        let written = tx.push_interleaved(&samples);
        assert!(written <= capacity);
    }
}
