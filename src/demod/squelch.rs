//! Squelch state machine (spec §4.3): three running estimates -- signal
//! level, a slow minimum-tracking noise floor, and a threshold derived from
//! the two (or an explicit override) -- gate a `Closed`/`Open` latch with
//! hang time to avoid chatter on a fluctuating signal.

use crate::config::SquelchConfig;
use crate::dsp::linear_to_dbfs;

const NOISE_FLOOR_DBFS: f32 = -120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquelchState {
    Closed,
    Open,
}

pub struct SquelchDetector {
    signal_coeff: f32,
    noise_rise_coeff: f32,
    level_mean_sq: f32,
    noise_floor_dbfs: f32,
    signal_dbfs: f32,
    threshold_dbfs: Option<f32>,
    snr_db: Option<f32>,
    open_hysteresis_db: f32,
    close_hysteresis_db: f32,
    hang_samples: u32,
    hang_remaining: u32,
    state: SquelchState,
}

impl SquelchDetector {
    /// `sample_rate_hz` is the channel's audio output rate; the ~100 ms
    /// signal window and 1-5 s noise-floor window are derived from it.
    pub fn new(sample_rate_hz: u32, cfg: &SquelchConfig) -> Self {
        let signal_window_s = 0.1;
        let noise_rise_window_s = 3.0;
        Self {
            signal_coeff: one_pole_coeff(signal_window_s, sample_rate_hz),
            noise_rise_coeff: one_pole_coeff(noise_rise_window_s, sample_rate_hz),
            level_mean_sq: 0.0,
            noise_floor_dbfs: NOISE_FLOOR_DBFS,
            signal_dbfs: NOISE_FLOOR_DBFS,
            threshold_dbfs: cfg.threshold_dbfs,
            snr_db: cfg.snr_db,
            open_hysteresis_db: cfg.open_hysteresis_db,
            close_hysteresis_db: cfg.close_hysteresis_db,
            hang_samples: ((cfg.hang_ms as f32 / 1000.0) * sample_rate_hz as f32) as u32,
            hang_remaining: 0,
            state: SquelchState::Closed,
        }
    }

    fn thresholds(&self) -> (f32, f32) {
        if let Some(t) = self.threshold_dbfs {
            (t, t - self.close_hysteresis_db.max(0.1))
        } else if let Some(snr) = self.snr_db {
            (
                self.noise_floor_dbfs + snr,
                self.noise_floor_dbfs + (snr - (self.open_hysteresis_db - self.close_hysteresis_db)).max(0.0),
            )
        } else {
            (
                self.noise_floor_dbfs + self.open_hysteresis_db,
                self.noise_floor_dbfs + self.close_hysteresis_db,
            )
        }
    }

    /// Feeds one demodulated audio sample, returns whether squelch is open
    /// after incorporating it.
    pub fn process(&mut self, sample: f32) -> bool {
        self.level_mean_sq += self.signal_coeff * (sample * sample - self.level_mean_sq);
        self.signal_dbfs = linear_to_dbfs(self.level_mean_sq.sqrt(), NOISE_FLOOR_DBFS);

        // Minimum tracker: snap down immediately, creep up slowly.
        if self.signal_dbfs < self.noise_floor_dbfs {
            self.noise_floor_dbfs = self.signal_dbfs;
        } else {
            self.noise_floor_dbfs += self.noise_rise_coeff * (self.signal_dbfs - self.noise_floor_dbfs);
        }

        let (open_thr, close_thr) = self.thresholds();
        match self.state {
            SquelchState::Closed => {
                if self.signal_dbfs >= open_thr {
                    self.state = SquelchState::Open;
                    self.hang_remaining = self.hang_samples;
                }
            }
            SquelchState::Open => {
                if self.signal_dbfs < close_thr {
                    if self.hang_remaining == 0 {
                        self.state = SquelchState::Closed;
                    } else {
                        self.hang_remaining -= 1;
                    }
                } else {
                    self.hang_remaining = self.hang_samples;
                }
            }
        }

        self.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.state == SquelchState::Open
    }

    /// The open threshold currently in effect, whichever of the three
    /// threshold modes (explicit dBFS, SNR-derived, hysteresis-only) is
    /// configured. Reported to the metering bus as `squelch_level_dbfs`.
    pub fn threshold_dbfs(&self) -> f32 {
        self.thresholds().0
    }

    pub fn signal_dbfs(&self) -> f32 {
        self.signal_dbfs
    }

    pub fn noise_floor_dbfs(&self) -> f32 {
        self.noise_floor_dbfs
    }

    /// `signal - noise`, clamped to `[0, 50]` for UI display (spec §4.3 SNR).
    pub fn snr_db(&self) -> f32 {
        (self.signal_dbfs - self.noise_floor_dbfs).clamp(0.0, 50.0)
    }
}

fn one_pole_coeff(window_s: f32, sample_rate_hz: u32) -> f32 {
    let samples = (window_s * sample_rate_hz as f32).max(1.0);
    1.0 - (-1.0 / samples).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SquelchConfig {
        SquelchConfig::default()
    }

    #[test]
    fn opens_on_strong_tone_closes_after_hang_on_silence() {
        let mut sq = SquelchDetector::new(8_000, &cfg());
        for _ in 0..4_000 {
            sq.process(0.8);
        }
        assert!(sq.is_open());

        // Drop to silence; should stay open through the hang window, then close.
        let mut still_open_during_hang = true;
        for i in 0..sq.hang_samples {
            if !sq.process(0.0) && i < sq.hang_samples - 1 {
                still_open_during_hang = false;
            }
        }
        assert!(still_open_during_hang);

        let mut closed = false;
        for _ in 0..2_000 {
            if !sq.process(0.0) {
                closed = true;
                break;
            }
        }
        assert!(closed);
    }

    #[test]
    fn brief_dip_under_hang_window_never_closes() {
        let mut sq = SquelchDetector::new(8_000, &cfg());
        for _ in 0..4_000 {
            sq.process(0.8);
        }
        assert!(sq.is_open());

        // A dip much shorter than the hang window.
        for _ in 0..(sq.hang_samples / 4) {
            sq.process(0.0);
        }
        assert!(sq.is_open());
    }
}
