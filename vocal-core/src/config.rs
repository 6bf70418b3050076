//! Configuration for detection, the exercises and the audio device.
//!
//! Every section falls back to defaults for missing fields, so a JSON file
//! only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::audio::PREFERRED_SAMPLE_RATE;
use crate::error::{CoachError, Result};
use crate::pitch::{BLOCK_SIZE, DEFAULT_RMS_GATE, DEFAULT_TRIM_THRESHOLD};
use crate::sequence::{MAX_LENGTH, MIN_LENGTH, USABLE_RANGE};
use crate::synth::Waveform;
use crate::tuning::CentsRounding;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub detector: DetectorConfig,
    pub range_finder: RangeFinderConfig,
    pub trainer: TrainerConfig,
    pub audio: AudioConfig,
}

/// Pitch detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub block_size: usize,
    pub rms_gate: f32,
    pub trim_threshold: f32,
    pub cents_rounding: CentsRounding,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            rms_gate: DEFAULT_RMS_GATE,
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
            cents_rounding: CentsRounding::Nearest,
        }
    }
}

/// Vocal range test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeFinderConfig {
    pub tick_ms: u64,
    /// Repeated identical readings needed (exclusive) before a record moves
    pub stability_threshold: u32,
}

impl Default for RangeFinderConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            stability_threshold: 3,
        }
    }
}

impl RangeFinderConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Repeat-after-me trainer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Notes per melody
    pub level: usize,
    pub scale_min: i32,
    pub scale_max: i32,
    pub lead_in_ms: u64,
    pub tone_duration_secs: f32,
    pub tone_spacing_ms: u64,
    pub tone_waveform: Waveform,
    pub silence_wait_ms: u64,
    pub warmup_ms: u64,
    pub tick_ms: u64,
    pub score_increment: u32,
    pub score_target: u32,
    pub cents_tolerance: i32,
    pub success_pause_ms: u64,
    pub success_tone_hz: f32,
    pub success_tone_secs: f32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            level: MIN_LENGTH,
            scale_min: USABLE_RANGE.0,
            scale_max: USABLE_RANGE.1,
            lead_in_ms: 500,
            tone_duration_secs: 0.8,
            tone_spacing_ms: 1200,
            tone_waveform: Waveform::Triangle,
            silence_wait_ms: 1500,
            warmup_ms: 500,
            tick_ms: 50,
            score_increment: 10,
            score_target: 100,
            cents_tolerance: 80,
            success_pause_ms: 500,
            success_tone_hz: 880.0,
            success_tone_secs: 0.1,
        }
    }
}

/// Audio device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub preferred_sample_rate: u32,
    pub resume_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: PREFERRED_SAMPLE_RATE,
            resume_timeout_ms: 500,
        }
    }
}

impl AudioConfig {
    pub fn resume_timeout(&self) -> Duration {
        Duration::from_millis(self.resume_timeout_ms)
    }
}

impl CoachConfig {
    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: CoachConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.block_size < 64 {
            return invalid(format!("detector.block_size {} is below 64", d.block_size));
        }
        if !(d.rms_gate > 0.0) {
            return invalid("detector.rms_gate must be positive");
        }
        if !(d.trim_threshold > 0.0 && d.trim_threshold <= 1.0) {
            return invalid("detector.trim_threshold must be in (0, 1]");
        }

        if self.range_finder.tick_ms == 0 {
            return invalid("range_finder.tick_ms must be positive");
        }

        let t = &self.trainer;
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&t.level) {
            return Err(CoachError::InvalidLevel(t.level));
        }
        if t.scale_min > t.scale_max {
            return invalid(format!(
                "trainer.scale_min {} is above scale_max {}",
                t.scale_min, t.scale_max
            ));
        }
        if t.tick_ms == 0 {
            return invalid("trainer.tick_ms must be positive");
        }
        if t.score_increment == 0 || t.score_increment > t.score_target {
            return invalid("trainer.score_increment must be in 1..=score_target");
        }
        if !(0..=100).contains(&t.cents_tolerance) {
            return invalid("trainer.cents_tolerance must be within 0..=100 cents");
        }
        if !(t.tone_duration_secs > 0.0 && t.success_tone_secs > 0.0) {
            return invalid("trainer tone durations must be positive");
        }

        if self.audio.preferred_sample_rate == 0 {
            return invalid("audio.preferred_sample_rate must be positive");
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(CoachError::InvalidConfig(message.into()))
}
