//! USB SDR hardware source, gated behind the `hardware` feature.
//!
//! Grounded in airjedi-desktop's `rtlsdr_source.rs`: the `rtlsdr` crate's API
//! is blocking and the device is not safely movable across the tokio runtime,
//! so a dedicated OS thread owns it and streams raw bytes out over a bounded
//! channel. `read_into` drains that channel from a blocking task.

use async_trait::async_trait;

use super::IqSource;
use crate::error::SkywaveError;

#[cfg(feature = "hardware")]
const READ_CHUNK_BYTES: usize = 262_144; // 256 KiB, matches librtlsdr's USB packet sizing

#[cfg(feature = "hardware")]
const CHANNEL_DEPTH: usize = 8;

#[cfg(feature = "hardware")]
pub struct UsbSdrSource {
    device_label: String,
    device_index: u32,
    sample_rate_hz: u32,
    center_freq_hz: u32,
    gain_tenths_db: Option<i32>,
    freq_correction_ppm: i32,
    rx: Option<crossbeam::channel::Receiver<Vec<u8>>>,
    error_flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    stop_flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

#[cfg(feature = "hardware")]
impl UsbSdrSource {
    pub fn new(
        device_label: impl Into<String>,
        device_index: u32,
        sample_rate_hz: u32,
        center_freq_hz: u64,
        gain_db: Option<f32>,
        freq_correction_ppm: i32,
    ) -> Self {
        Self {
            device_label: device_label.into(),
            device_index,
            sample_rate_hz,
            center_freq_hz: center_freq_hz as u32,
            gain_tenths_db: gain_db.map(|g| (g * 10.0).round() as i32),
            freq_correction_ppm,
            rx: None,
            error_flag: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            stop_flag: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

#[cfg(feature = "hardware")]
#[async_trait]
impl IqSource for UsbSdrSource {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        let (tx, rx) = crossbeam::channel::bounded::<Vec<u8>>(CHANNEL_DEPTH);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let device_index = self.device_index;
        let sample_rate_hz = self.sample_rate_hz;
        let center_freq_hz = self.center_freq_hz;
        let gain_tenths_db = self.gain_tenths_db;
        let freq_correction_ppm = self.freq_correction_ppm;
        let error_flag = self.error_flag.clone();
        let stop_flag = self.stop_flag.clone();
        let label = self.device_label.clone();

        let handle = std::thread::spawn(move || {
            let mut device = match rtlsdr::open(device_index as i32) {
                Ok(dev) => dev,
                Err(e) => {
                    let _ = init_tx.send(Err(format!("open failed: {e}")));
                    return;
                }
            };

            let configured = (|| -> Result<(), String> {
                device
                    .set_center_freq(center_freq_hz)
                    .map_err(|e| format!("set_center_freq: {e}"))?;
                device
                    .set_sample_rate(sample_rate_hz)
                    .map_err(|e| format!("set_sample_rate: {e}"))?;
                match gain_tenths_db {
                    Some(gain) => {
                        device
                            .set_tuner_gain_mode(true)
                            .map_err(|e| format!("set_tuner_gain_mode: {e}"))?;
                        device.set_tuner_gain(gain).map_err(|e| format!("set_tuner_gain: {e}"))?;
                    }
                    None => {
                        device
                            .set_tuner_gain_mode(false)
                            .map_err(|e| format!("set_tuner_gain_mode: {e}"))?;
                    }
                }
                if freq_correction_ppm != 0 {
                    device
                        .set_freq_correction(freq_correction_ppm)
                        .map_err(|e| format!("set_freq_correction: {e}"))?;
                }
                device.reset_buffer().map_err(|e| format!("reset_buffer: {e}"))?;
                Ok(())
            })();

            if let Err(reason) = configured {
                let _ = init_tx.send(Err(reason));
                return;
            }
            let _ = init_tx.send(Ok(()));

            while !stop_flag.load(std::sync::atomic::Ordering::Relaxed) {
                match device.read_sync(READ_CHUNK_BYTES) {
                    Ok(buf) => {
                        // Bounded send: drop this chunk if the channelizer side
                        // is behind rather than blocking the USB read loop.
                        let _ = tx.try_send(buf);
                    }
                    Err(e) => {
                        tracing::error!(device = %label, error = %e, "usb sdr read failed");
                        error_flag.store(true, std::sync::atomic::Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        match init_rx.recv_timeout(std::time::Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(SkywaveError::DeviceInit {
                    device: self.device_label.clone(),
                    reason,
                })
            }
            Err(_) => {
                return Err(SkywaveError::DeviceInit {
                    device: self.device_label.clone(),
                    reason: "device initialization timed out".to_string(),
                })
            }
        }

        tracing::info!(device = %self.device_label, index = device_index, "usb sdr device opened");
        self.rx = Some(rx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    async fn read_into(&mut self, out: &mut Vec<f32>) -> Result<usize, SkywaveError> {
        if self.error_flag.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(SkywaveError::InputFatal {
                device: self.device_label.clone(),
                reason: "background read thread failed".to_string(),
            });
        }

        let rx = self.rx.clone().ok_or_else(|| SkywaveError::InputFatal {
            device: self.device_label.clone(),
            reason: "read_into called before open".to_string(),
        })?;
        let label = self.device_label.clone();

        let buf = tokio::task::spawn_blocking(move || rx.recv_timeout(std::time::Duration::from_millis(500)))
            .await
            .map_err(|e| SkywaveError::Internal(format!("usb sdr read task join failed: {e}")))?;

        match buf {
            Ok(bytes) => {
                super::u8_to_f32_interleaved(&bytes, out);
                Ok(out.len())
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                out.clear();
                Ok(0)
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => Err(SkywaveError::InputFatal {
                device: label,
                reason: "usb sdr read thread exited".to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        self.stop_flag.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let label = self.device_label.clone();
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
            tracing::info!(device = %label, "usb sdr device closed");
        }
    }
}

/// Stub used when the `hardware` feature is disabled, mirroring
/// airjedi-desktop's `#[cfg(not(feature = "hardware"))]` fallback.
#[cfg(not(feature = "hardware"))]
pub struct UsbSdrSource {
    device_label: String,
}

#[cfg(not(feature = "hardware"))]
impl UsbSdrSource {
    pub fn new(
        device_label: impl Into<String>,
        _device_index: u32,
        _sample_rate_hz: u32,
        _center_freq_hz: u64,
        _gain_db: Option<f32>,
        _freq_correction_ppm: i32,
    ) -> Self {
        Self {
            device_label: device_label.into(),
        }
    }
}

#[cfg(not(feature = "hardware"))]
#[async_trait]
impl IqSource for UsbSdrSource {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        Err(SkywaveError::DeviceInit {
            device: self.device_label.clone(),
            reason: "usb sdr source requires the 'hardware' feature to be enabled".to_string(),
        })
    }

    async fn read_into(&mut self, _out: &mut Vec<f32>) -> Result<usize, SkywaveError> {
        Err(SkywaveError::InputFatal {
            device: self.device_label.clone(),
            reason: "usb sdr source requires the 'hardware' feature to be enabled".to_string(),
        })
    }

    async fn close(&mut self) {}
}

#[cfg(all(test, not(feature = "hardware")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_open_reports_missing_feature() {
        let mut src = UsbSdrSource::new("dev0", 0, 2_400_000, 100_000_000, None, 0);
        assert!(matches!(src.open().await, Err(SkywaveError::DeviceInit { .. })));
    }
}
