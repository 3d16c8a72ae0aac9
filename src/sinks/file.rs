//! File sink (spec §4.4, §6 on-disk layout): writes demodulated audio to
//! `<directory>/<channel_label>[/<YYYY-MM-DD>]/<template>[_<freq>]_<timestamp>.<ext>`.
//!
//! Filename templating follows the teacher's `filename_generation.rs`:
//! a `{variable}` regex substitution over a small set of time/metadata
//! variables, with the same sanitization rules for any metadata-derived
//! values that end up in the template.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::config::{FileFormat, FileSinkConfig};
use crate::demod::AudioFrame;
use crate::error::SkywaveError;

use super::encoders::{make_encoder, AudioEncoder};
use super::{AudioSink, SinkStatus};

/// Replaces characters that are unsafe in filenames across common
/// filesystems, then collapses repeated underscores and trims them from
/// the ends (teacher's `sanitize_filename`).
pub fn sanitize_filename(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            ' ' => out.push('_'),
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '.' => out.push('_'),
            c if c.is_alphanumeric() || c == '_' || c == '-' => out.push(c),
            _ => out.push('_'),
        }
    }
    let collapsed = Regex::new(r"_+").unwrap().replace_all(&out, "_").to_string();
    let trimmed = collapsed.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let re = Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap();
    re.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| format!("{{{key}}}"))
    })
    .to_string()
}

struct TimeVars {
    timestamp: String,
    date: String,
}

fn now_vars() -> TimeVars {
    let now = Local::now();
    TimeVars {
        timestamp: now.format("%Y%m%d_%H%M%S").to_string(),
        date: now.format("%Y-%m-%d").to_string(),
    }
}

pub struct FileSink {
    cfg: FileSinkConfig,
    channel_label: String,
    freq_hz: u64,
    encoder: Option<Box<dyn AudioEncoder>>,
    handle: Option<File>,
    current_minute_bucket: Option<i64>,
    status: SinkStatus,
    last_squelch_open: bool,
}

impl FileSink {
    pub fn new(cfg: FileSinkConfig, channel_label: String, freq_hz: u64) -> Self {
        Self {
            cfg,
            channel_label,
            freq_hz,
            encoder: None,
            handle: None,
            current_minute_bucket: None,
            status: SinkStatus::Idle,
            last_squelch_open: false,
        }
    }

    fn base_directory(&self) -> PathBuf {
        self.cfg
            .directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./recordings"))
    }

    fn target_path(&self) -> PathBuf {
        let vars = now_vars();
        let mut dir = self.base_directory().join(sanitize_filename(&self.channel_label));
        if self.cfg.dated_subdirectories {
            dir = dir.join(&vars.date);
        }

        let rendered = render_template(
            &self.cfg.filename_template,
            &[("timestamp", vars.timestamp.clone()), ("date", vars.date.clone())],
        );
        let mut stem = sanitize_filename(&rendered);
        if self.cfg.include_freq {
            stem = format!("{stem}_{}", self.freq_hz);
        }
        if stem.is_empty() || !stem.contains(&vars.timestamp) {
            stem = format!("{stem}_{}", vars.timestamp);
        }

        let ext = match self.cfg.format {
            FileFormat::Wav => "wav",
            FileFormat::Mp3 => "mp3",
            FileFormat::RawPcm => "pcm",
        };
        dir.join(format!("{stem}.{ext}"))
    }

    fn minute_bucket(now_unix_ms: u64) -> i64 {
        (now_unix_ms / 60_000) as i64
    }

    async fn rotate_if_needed(&mut self, now_unix_ms: u64, force_new_file: bool) -> Result<(), SkywaveError> {
        let chunk_minutes = self.cfg.chunk_duration_minutes;
        let needs_rotation = force_new_file
            || match (chunk_minutes, self.current_minute_bucket) {
                (None, _) => self.handle.is_none(),
                (Some(chunk), Some(start)) => {
                    let bucket = Self::minute_bucket(now_unix_ms);
                    bucket - start >= chunk as i64
                }
                (Some(_), None) => true,
            };

        if !needs_rotation && self.handle.is_some() {
            return Ok(());
        }

        if let Some(mut handle) = self.handle.take() {
            if let Some(encoder) = self.encoder.as_mut() {
                let tail = encoder.finalize()?;
                if !tail.is_empty() {
                    handle
                        .write_all(&tail)
                        .await
                        .map_err(|e| SkywaveError::SinkFatal { sink: "file".into(), reason: e.to_string() })?;
                }
            }
        }

        let path = self.target_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SkywaveError::SinkFatal { sink: "file".into(), reason: e.to_string() })?;
        }

        let file = if self.cfg.append {
            fs::OpenOptions::new().create(true).append(true).open(&path).await
        } else {
            File::create(&path).await
        }
        .map_err(|e| SkywaveError::SinkTransient { sink: "file".into(), reason: e.to_string() })?;

        self.handle = Some(file);
        self.current_minute_bucket = Some(Self::minute_bucket(now_unix_ms));

        if let Some(encoder) = self.encoder.as_mut() {
            encoder.initialize(48_000)?;
        }
        Ok(())
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn open(&mut self) -> Result<(), SkywaveError> {
        self.encoder = make_encoder(self.cfg.format, 64);
        self.status = SinkStatus::Active;
        Ok(())
    }

    async fn accept(&mut self, frame: &AudioFrame) -> Result<(), SkywaveError> {
        if !self.cfg.continuous && !frame.squelch_open {
            self.last_squelch_open = frame.squelch_open;
            return Ok(());
        }

        // split_on_transmission: start a fresh file on every squelch-closed
        // -> squelch-open transition, so each transmission lands in its own
        // file regardless of the chunk-duration rotation schedule.
        let squelch_rising_edge = self.cfg.split_on_transmission && frame.squelch_open && !self.last_squelch_open;
        self.last_squelch_open = frame.squelch_open;

        if let Err(e) = self.rotate_if_needed(frame.timestamp_unix_ms, squelch_rising_edge).await {
            self.status = SinkStatus::Error(e.to_string());
            return Err(e);
        }

        let bytes = match (&mut self.encoder, self.cfg.format) {
            (Some(encoder), _) => encoder.encode(&frame.samples)?,
            (None, FileFormat::RawPcm) => frame
                .samples
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect(),
            (None, _) => return Ok(()),
        };

        if let Some(handle) = self.handle.as_mut() {
            handle
                .write_all(&bytes)
                .await
                .map_err(|e| SkywaveError::SinkTransient { sink: "file".into(), reason: e.to_string() })?;
        }
        self.status = SinkStatus::Active;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SkywaveError> {
        if let Some(handle) = self.handle.as_mut() {
            handle
                .flush()
                .await
                .map_err(|e| SkywaveError::SinkTransient { sink: "file".into(), reason: e.to_string() })?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SkywaveError> {
        if let Some(encoder) = self.encoder.as_mut() {
            let tail = encoder.finalize()?;
            if let Some(handle) = self.handle.as_mut() {
                if !tail.is_empty() {
                    let _ = handle.write_all(&tail).await;
                }
                let _ = handle.flush().await;
            }
        }
        self.handle = None;
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
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("tower/1: north"), "tower_1_north");
    }

    #[test]
    fn sanitize_collapses_repeated_underscores_and_trims() {
        assert_eq!(sanitize_filename("__a---b__"), "a---b");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_filename("///"), "untitled");
    }

    #[test]
    fn render_template_substitutes_known_variables() {
        let out = render_template("{timestamp}_{date}", &[
            ("timestamp", "20260101_000000".to_string()),
            ("date", "2026-01-01".to_string()),
        ]);
        assert_eq!(out, "20260101_000000_2026-01-01");
    }

    #[test]
    fn render_template_leaves_unknown_variables_intact() {
        let out = render_template("{unknown}", &[("timestamp", "x".to_string())]);
        assert_eq!(out, "{unknown}");
    }
}
