//! # Pitch Detection Module
//!
//! Normalized autocorrelation pitch detection with an energy gate, tuned for
//! single sung or whistled notes.
//!
//! ## Steps
//! 1. RMS gate to skip silence and soft noise
//! 2. Trim the leading and trailing edges of the block
//! 3. Autocorrelation over every lag
//! 4. First dip, then the strongest peak after it
//! 5. Parabolic interpolation for sub-sample accuracy

use crate::config::DetectorConfig;
use crate::fft::Autocorrelator;

/// Default analysis block size in samples.
pub const BLOCK_SIZE: usize = 2048;
/// RMS below which a block is treated as silence.
pub const DEFAULT_RMS_GATE: f32 = 0.005;
/// Amplitude under which a sample counts as near a zero crossing when trimming.
pub const DEFAULT_TRIM_THRESHOLD: f32 = 0.2;

/// Autocorrelation pitch detector with reusable working buffers.
pub struct PitchDetector {
    rms_gate: f32,
    trim_threshold: f32,
    autocorrelator: Autocorrelator,
    correlation: Vec<f64>,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}

impl PitchDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            rms_gate: config.rms_gate,
            trim_threshold: config.trim_threshold,
            autocorrelator: Autocorrelator::new(),
            correlation: Vec::with_capacity(config.block_size),
        }
    }

    /// Estimates the fundamental frequency of a block.
    ///
    /// # Arguments
    /// * `signal` - Time-domain samples
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `Some(frequency)` - Estimated fundamental in Hz. It may lie outside
    ///   the voice range; the note mapper rejects those values.
    /// * `None` - Silence, an empty block after trimming, or no usable period
    pub fn detect(&mut self, signal: &[f32], sample_rate: u32) -> Option<f32> {
        if signal.is_empty() || rms(signal) < self.rms_gate {
            return None;
        }

        let trimmed = trim_edges(signal, self.trim_threshold);
        if trimmed.len() < 3 {
            return None;
        }

        self.autocorrelator
            .autocorrelate(trimmed, &mut self.correlation);
        let period = pick_period(&self.correlation)?;

        let frequency = (sample_rate as f64 / period) as f32;
        frequency.is_finite().then_some(frequency)
    }

    /// Drops the working buffers so a stopped session holds no analysis state.
    pub fn reset(&mut self) {
        self.correlation = Vec::new();
        self.autocorrelator.release_buffers();
    }
}

/// Root mean square of a block.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Trims loud runs at both ends of a block.
///
/// The start moves to the first sample in the first half whose magnitude is
/// under `threshold`, and the end to the last such sample in the second half
/// (exclusive). When no sample qualifies the block edge is kept.
pub fn trim_edges(signal: &[f32], threshold: f32) -> &[f32] {
    let n = signal.len();
    let half = n / 2;

    let start = (0..half)
        .find(|&i| signal[i].abs() < threshold)
        .unwrap_or(0);
    let end = (1..half)
        .map(|i| n - i)
        .find(|&i| signal[i].abs() < threshold)
        .unwrap_or(n.saturating_sub(1));

    if start >= end {
        return &[];
    }
    &signal[start..end]
}

/// Picks the fundamental period, in samples, from an autocorrelation curve.
///
/// Walks down from the zero-lag peak to the first local minimum, takes the
/// highest value at or after it, then refines the lag with a parabola through
/// the peak and its neighbours.
pub fn pick_period(correlation: &[f64]) -> Option<f64> {
    let len = correlation.len();
    if len < 3 {
        return None;
    }

    let mut dip = 0;
    while dip + 1 < len && correlation[dip] > correlation[dip + 1] {
        dip += 1;
    }

    let mut peak = dip;
    for lag in dip..len {
        if correlation[lag] > correlation[peak] {
            peak = lag;
        }
    }
    if peak == 0 {
        return None;
    }

    let mut period = peak as f64;
    if peak + 1 < len {
        let y1 = correlation[peak - 1];
        let y2 = correlation[peak];
        let y3 = correlation[peak + 1];
        let a = (y1 + y3 - 2.0 * y2) / 2.0;
        let b = (y3 - y1) / 2.0;
        if a != 0.0 {
            period -= b / (2.0 * a);
        }
    }

    (period > 0.0).then_some(period)
}
