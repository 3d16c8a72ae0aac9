//! Wires the Input -> Channelizer -> Demodulator -> Sinks stages together
//! (spec §5): one task per device for input, one per device for the
//! channelizer, one per channel for the demodulator, and one per sink so a
//! slow sink never backs up the channel ahead of it.
//!
//! Queue boundaries use [`crate::queue`]'s bounded drop-oldest channel
//! (capacity 4 per spec §5 default) everywhere except the device's raw IQ
//! ring buffer, which uses the lock-free `rtrb` ring from
//! [`crate::input::ring_buffer`].

use std::collections::HashMap;
use std::sync::Arc;

use num_complex::Complex32;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channel::Channel;
use crate::channelizer::{ChannelBatch, Channelizer, ChannelizerConfig};
use crate::config::{DeviceConfig, DeviceKind, SinkConfig, SystemConfig};
use crate::demod::{AudioFrame, ChannelDemodulator};
use crate::device::Device;
use crate::error::SkywaveError;
use crate::input::file_replay::FileReplaySource;
use crate::input::ring_buffer::{self, IqRingConsumer, IqRingProducer};
use crate::input::usb_sdr::UsbSdrSource;
use crate::input::{IqNormalizer, IqSource};
use crate::metering::MeteringBus;
use crate::queue::{self, OverwritingReceiver, OverwritingSender};
use crate::sinks::file::FileSink;
use crate::sinks::http_api::HttpApiSink;
use crate::sinks::icecast::IcecastSink;
use crate::sinks::redis::RedisSink;
use crate::sinks::udp::UdpSink;
use crate::sinks::AudioSink;

/// Queue depth between adjacent stages (spec §5 default).
const STAGE_QUEUE_DEPTH: usize = 4;

/// Consecutive `InputTransient` errors from one device before it is treated
/// as persistently failing rather than just flaky, promoting the device to
/// `InputFatal` (spec §4.1's "persistent errors" distinction, grounded in
/// the teacher's `DeviceHealth` consecutive-error tracking).
const PERSISTENT_ERROR_THRESHOLD: u32 = 5;

struct SinkTask {
    handle: JoinHandle<()>,
    queue: OverwritingSender<Arc<AudioFrame>>,
}

struct ChannelRuntime {
    channel_index: u32,
    demod_handle: JoinHandle<()>,
    demod_queue: OverwritingSender<ChannelBatch>,
    sinks: Vec<SinkTask>,
}

struct DeviceRuntime {
    device_index: u32,
    stop_tx: watch::Sender<bool>,
    input_handle: JoinHandle<()>,
    channelizer_handle: JoinHandle<()>,
    channels: Vec<ChannelRuntime>,
}

/// Owns every running task for one activated `SystemConfig` and enforces
/// LIFO teardown: sinks, then demodulators, then channelizers, then input.
pub struct Pipeline {
    pub metering: Arc<MeteringBus>,
    devices: Vec<DeviceRuntime>,
    error_rx: mpsc::Receiver<(u32, SkywaveError)>,
}

impl Pipeline {
    /// Validates and activates a config, spawning every stage task. Returns
    /// the pipeline plus any device- or channel-local rejections
    /// (`DeviceRejected` for a ceiling overflow, `ChannelRejected` for an
    /// out-of-band or duplicate channel) that were skipped rather than
    /// fatal -- every sibling device and channel still starts (spec §7/§8).
    /// Only a config-wide `Config` error aborts the whole call.
    pub fn start(config: SystemConfig) -> Result<(Self, Vec<SkywaveError>), Vec<SkywaveError>> {
        let fatal_errors: Vec<SkywaveError> = config.validate().into_iter().filter(SkywaveError::is_fatal).collect();
        if !fatal_errors.is_empty() {
            return Err(fatal_errors);
        }
        let skipped = config.validate();

        let metering = Arc::new(MeteringBus::new());
        let (error_tx, error_rx) = mpsc::channel(32);

        let mut devices = Vec::new();
        for device_cfg in &config.devices {
            if !device_cfg.enabled {
                continue;
            }
            match spawn_device(device_cfg, metering.clone(), error_tx.clone()) {
                Ok(runtime) => devices.push(runtime),
                Err(e) => {
                    warn!(device = device_cfg.index, error = %e, "device failed to activate");
                    let _ = error_tx.try_send((device_cfg.index, e));
                }
            }
        }

        Ok((Self { metering, devices, error_rx }, skipped))
    }

    /// Drains any fatal device errors raised since the last call, without
    /// blocking (status CLI / supervisory loop, spec §7).
    pub fn poll_errors(&mut self) -> Vec<(u32, SkywaveError)> {
        let mut out = Vec::new();
        while let Ok(entry) = self.error_rx.try_recv() {
            out.push(entry);
        }
        out
    }

    /// Stops every task in LIFO order: sinks, demodulators, channelizers,
    /// then input sources (spec §5 shutdown ordering).
    pub async fn shutdown(self) {
        for device in self.devices {
            let _ = device.stop_tx.send(true);

            for channel in device.channels {
                channel.demod_queue.close();
                for sink in channel.sinks {
                    sink.queue.close();
                    let _ = sink.handle.await;
                }
                let _ = channel.demod_handle.await;
            }

            let _ = device.channelizer_handle.await;
            let _ = device.input_handle.await;
            info!(device = device.device_index, "device pipeline stopped");
        }
    }
}

fn spawn_device(
    device_cfg: &DeviceConfig,
    metering: Arc<MeteringBus>,
    error_tx: mpsc::Sender<(u32, SkywaveError)>,
) -> Result<DeviceRuntime, SkywaveError> {
    let mut device = Device::new(device_cfg.clone());
    device.mark_running();

    if device.channels.len() > crate::config::MAX_CHANNELS_PER_DEVICE {
        return Err(SkywaveError::DeviceRejected {
            device: device_cfg.index,
            reason: format!(
                "enables {} channels, exceeding the {}-channel ceiling",
                device.channels.len(),
                crate::config::MAX_CHANNELS_PER_DEVICE
            ),
        });
    }

    let chz_cfg = ChannelizerConfig {
        sample_rate_hz: device_cfg.sample_rate_hz,
        center_freq_hz: device_cfg.center_freq_hz,
        fft_size: device_cfg.fft_size,
    };

    // Channels that don't fit this device's band are reported and dropped
    // here rather than left to abort the whole `Channelizer::new` call --
    // every other channel on this device still starts (spec §8 scenario 5).
    let mut rejected = Vec::new();
    device.channels.retain(|channel| {
        match crate::channelizer::geometry_for_channel(
            &chz_cfg,
            channel.config.channel_index,
            channel.config.freq_hz,
            channel.config.bandwidth_hz,
        ) {
            Ok(_) => true,
            Err(_) => {
                rejected.push(SkywaveError::ChannelRejected {
                    device: device_cfg.index,
                    channel: channel.config.channel_index,
                    reason: format!(
                        "{} Hz lies outside device {}'s band",
                        channel.config.freq_hz, device_cfg.index
                    ),
                });
                false
            }
        }
    });
    for err in rejected {
        warn!(device = device_cfg.index, error = %err, "channel rejected, skipping");
        let _ = error_tx.try_send((device_cfg.index, err));
    }

    let channel_specs: Vec<(u32, u64, u32)> = device
        .channels
        .iter()
        .map(|c| (c.config.channel_index, c.config.freq_hz, c.config.bandwidth_hz))
        .collect();
    let channelizer = Channelizer::new(chz_cfg, &channel_specs)?;
    let bin_hz = device_cfg.sample_rate_hz as f32 / device_cfg.fft_size as f32;

    let (producer, consumer) = ring_buffer::channel(device_cfg.fft_size);

    let (stop_tx, stop_rx) = watch::channel(false);

    let mut channel_queues = HashMap::new();
    let mut channels = Vec::new();
    for channel in &device.channels {
        let (demod_tx, demod_rx) = queue::channel::<ChannelBatch>(STAGE_QUEUE_DEPTH);
        channel_queues.insert(channel.config.channel_index, demod_tx.clone());

        let mut sinks = Vec::new();
        for sink_cfg in &channel.config.outputs {
            sinks.push(spawn_sink(sink_cfg.clone(), channel, device_cfg, error_tx.clone()));
        }

        let demod_handle = spawn_demod_task(
            device_cfg.index,
            channel.config.clone(),
            device_cfg.sample_rate_hz,
            bin_hz,
            demod_rx,
            metering.clone(),
            sinks.iter().map(|s| s.queue.clone()).collect(),
        );

        channels.push(ChannelRuntime {
            channel_index: channel.config.channel_index,
            demod_handle,
            demod_queue: demod_tx,
            sinks,
        });
    }

    let channelizer_handle = spawn_channelizer_task(device_cfg.index, channelizer, consumer, channel_queues, error_tx.clone());
    let input_handle = spawn_input_task(device_cfg.clone(), producer, stop_rx.clone(), error_tx);

    Ok(DeviceRuntime {
        device_index: device_cfg.index,
        stop_tx,
        input_handle,
        channelizer_handle,
        channels,
    })
}

fn spawn_input_task(
    device_cfg: DeviceConfig,
    mut producer: IqRingProducer,
    mut stop_rx: watch::Receiver<bool>,
    error_tx: mpsc::Sender<(u32, SkywaveError)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let device_label = format!("device-{}", device_cfg.index);
        let mut source: Box<dyn IqSource> = match device_cfg.kind {
            DeviceKind::File => {
                let path = device_cfg.replay_path.clone().unwrap_or_default();
                Box::new(FileReplaySource::new(
                    device_label.clone(),
                    std::path::PathBuf::from(path),
                    device_cfg.sample_rate_hz,
                    device_cfg.speedup_factor,
                ))
            }
            DeviceKind::UsbSdr | DeviceKind::Generic => Box::new(UsbSdrSource::new(
                device_label.clone(),
                device_cfg.index,
                device_cfg.sample_rate_hz,
                device_cfg.center_freq_hz,
                (device_cfg.gain_db != 0.0).then_some(device_cfg.gain_db),
                device_cfg.freq_correction_ppm.round() as i32,
            )),
        };

        if let Err(e) = source.open().await {
            error!(device = %device_label, error = %e, "device failed to open");
            let _ = error_tx.send((device_cfg.index, e)).await;
            return;
        }

        let mut normalizer = IqNormalizer::new();
        let mut buf = Vec::new();
        let mut consecutive_transient = 0u32;

        loop {
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                result = source.read_into(&mut buf) => {
                    match result {
                        Ok(0) => {}
                        Ok(_) => {
                            consecutive_transient = 0;
                            normalizer.process(&mut buf);
                            producer.push_interleaved(&buf);
                        }
                        Err(e) if e.is_fatal() => {
                            error!(device = %device_label, error = %e, "fatal input error");
                            let _ = error_tx.send((device_cfg.index, e)).await;
                            break;
                        }
                        Err(SkywaveError::EndOfStream { .. }) if device_cfg.kind == DeviceKind::File => {
                            info!(device = %device_label, "replay file exhausted");
                            break;
                        }
                        Err(e) => {
                            consecutive_transient += 1;
                            if consecutive_transient >= PERSISTENT_ERROR_THRESHOLD {
                                error!(
                                    device = %device_label,
                                    error = %e,
                                    consecutive_transient,
                                    "transient input errors persisted past threshold, treating as fatal"
                                );
                                let _ = error_tx
                                    .send((
                                        device_cfg.index,
                                        SkywaveError::InputFatal {
                                            device: device_label.clone(),
                                            reason: format!("{consecutive_transient} consecutive transient errors: {e}"),
                                        },
                                    ))
                                    .await;
                                break;
                            }
                            warn!(device = %device_label, error = %e, "transient input error, retrying");
                        }
                    }
                }
            }
        }

        source.close().await;
    })
}

fn spawn_channelizer_task(
    device_index: u32,
    mut channelizer: Channelizer,
    mut consumer: IqRingConsumer,
    channel_queues: HashMap<u32, OverwritingSender<ChannelBatch>>,
    error_tx: mpsc::Sender<(u32, SkywaveError)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interleaved = Vec::new();
        loop {
            consumer.wait_for_data().await;
            interleaved.clear();
            consumer.drain_into(&mut interleaved, 1 << 16);
            if interleaved.is_empty() {
                continue;
            }

            let complex: Vec<Complex32> = interleaved
                .chunks_exact(2)
                .map(|p| Complex32::new(p[0], p[1]))
                .collect();

            for batch in channelizer.process(&complex) {
                if let Some(queue) = channel_queues.get(&batch.channel_index) {
                    if queue.overrun_count() > 0 && queue.overrun_count() % 100 == 0 {
                        let _ = error_tx
                            .send((
                                device_index,
                                SkywaveError::ChannelizerOverrun {
                                    device: format!("device-{device_index}"),
                                    channel: batch.channel_index,
                                },
                            ))
                            .await;
                    }
                    queue.push(batch);
                }
            }
        }
    })
}

fn spawn_demod_task(
    device_index: u32,
    channel_cfg: crate::config::ChannelConfig,
    output_sample_rate_hz: u32,
    wideband_bin_hz: f32,
    mut demod_rx: OverwritingReceiver<ChannelBatch>,
    metering: Arc<MeteringBus>,
    sink_queues: Vec<OverwritingSender<Arc<AudioFrame>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut demod = ChannelDemodulator::new(device_index, &channel_cfg, output_sample_rate_hz, wideband_bin_hz);
        while let Some(batch) = demod_rx.recv().await {
            let now_unix_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let frame = Arc::new(demod.process_batch(&batch, &metering, now_unix_ms));
            for queue in &sink_queues {
                queue.push(frame.clone());
            }
        }
        metering.remove(device_index, channel_cfg.channel_index);
    })
}

fn spawn_sink(
    sink_cfg: SinkConfig,
    channel: &Channel,
    device_cfg: &DeviceConfig,
    error_tx: mpsc::Sender<(u32, SkywaveError)>,
) -> SinkTask {
    let (tx, mut rx) = queue::channel::<Arc<AudioFrame>>(STAGE_QUEUE_DEPTH);
    let label = channel.config.label.clone();
    let freq_hz = channel.config.freq_hz;
    let default_udp_port = channel.default_udp_port();
    let device_index = device_cfg.index;
    let sink_type = sink_cfg.type_name();

    let handle = tokio::spawn(async move {
        let mut sink: Box<dyn AudioSink> = match sink_cfg {
            SinkConfig::File(c) => Box::new(FileSink::new(c, label.clone(), freq_hz)),
            SinkConfig::UdpStream(c) => Box::new(UdpSink::new(c, default_udp_port)),
            SinkConfig::Icecast(c) => Box::new(IcecastSink::new(c, label.clone())),
            SinkConfig::HttpApi(c) => Box::new(HttpApiSink::new(c, freq_hz)),
            SinkConfig::Redis(c) => Box::new(RedisSink::new(c, label.clone())),
        };

        if let Err(e) = sink.open().await {
            error!(channel = %label, error = %e, "sink failed to open");
            return;
        }

        let mut consecutive_failures = 0u32;
        while let Some(frame) = rx.recv().await {
            match sink.accept(&frame).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= crate::sinks::MAX_CONSECUTIVE_RETRIES {
                        warn!(channel = %label, error = %e, consecutive_failures, "sink repeatedly failing");
                        let _ = error_tx
                            .send((
                                device_index,
                                SkywaveError::SinkFatal {
                                    sink: format!("{sink_type}:{label}"),
                                    reason: format!("{consecutive_failures} consecutive failures: {e}"),
                                },
                            ))
                            .await;
                        consecutive_failures = 0;
                    }
                }
            }
        }

        let _ = sink.close().await;
    });

    SinkTask { handle, queue: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, DeviceKind, Modulation, SquelchConfig};

    fn file_device(path: &str) -> DeviceConfig {
        DeviceConfig {
            index: 0,
            kind: DeviceKind::File,
            sample_rate_hz: 48_000,
            center_freq_hz: 100_000_000,
            gain_db: 0.0,
            freq_correction_ppm: 0.0,
            enabled: true,
            fft_size: 1024,
            replay_path: Some(path.to_string()),
            speedup_factor: 1000.0,
            channels: vec![ChannelConfig {
                channel_index: 0,
                label: "ch0".to_string(),
                freq_hz: 100_000_000,
                modulation: Modulation::Am,
                bandwidth_hz: 12_500,
                highpass_hz: 100.0,
                lowpass_hz: 2_500.0,
                amp_factor: 1.0,
                squelch: SquelchConfig::default(),
                afc_steps: 8,
                notch_hz: 0.0,
                notch_q: 10.0,
                ctcss_tone_hz: 0.0,
                enabled: true,
                outputs: Vec::new(),
            }],
        }
    }

    #[tokio::test]
    async fn starts_and_shuts_down_a_file_replay_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.cf32");
        crate::input::file_replay::write_test_iq_file(&path, 48_000.0, 0.2, &[1_000.0]).unwrap();

        let cfg = SystemConfig { devices: vec![file_device(path.to_str().unwrap())] };
        let (pipeline, skipped) = Pipeline::start(cfg).expect("pipeline should start");
        assert!(skipped.is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn ceiling_violation_skips_only_the_offending_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.cf32");
        crate::input::file_replay::write_test_iq_file(&path, 48_000.0, 0.1, &[0.0]).unwrap();

        let mut over_ceiling = file_device(path.to_str().unwrap());
        over_ceiling.index = 0;
        over_ceiling.channels = (0..9)
            .map(|i| ChannelConfig {
                channel_index: i,
                freq_hz: 100_000_000 + i as u64 * 10_000,
                ..over_ceiling.channels[0].clone()
            })
            .collect();

        let mut sibling = file_device(path.to_str().unwrap());
        sibling.index = 1;

        let cfg = SystemConfig { devices: vec![over_ceiling, sibling] };
        let (pipeline, skipped) = Pipeline::start(cfg).expect("ceiling overflow on one device must not abort the config");
        assert!(skipped.iter().any(|e| matches!(e, SkywaveError::DeviceRejected { device: 0, .. })));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn out_of_band_channel_is_skipped_while_siblings_on_the_same_device_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.cf32");
        crate::input::file_replay::write_test_iq_file(&path, 48_000.0, 0.1, &[0.0]).unwrap();

        let mut device = file_device(path.to_str().unwrap());
        let in_band = device.channels[0].clone();
        let mut out_of_band = in_band.clone();
        out_of_band.channel_index = 1;
        out_of_band.freq_hz = 100_000_000 + 10_000_000; // far outside a 48 kHz-wide band
        device.channels = vec![in_band, out_of_band];

        let cfg = SystemConfig { devices: vec![device] };
        let (pipeline, skipped) = Pipeline::start(cfg).expect("the in-band channel must still start");
        assert!(skipped.iter().any(|e| matches!(e, SkywaveError::ChannelRejected { channel: 1, .. })));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        pipeline.shutdown().await;
    }
}
