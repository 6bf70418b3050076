//! # Tone Synthesis Module
//!
//! Reference tones for the exercises: a single oscillator shaped by a short
//! attack/sustain/release envelope, rendered sample by sample inside the
//! output stream callback.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Shortest tone that will be scheduled, in seconds.
pub const MIN_TONE_DURATION: f32 = 0.1;

const ATTACK: f32 = 0.05;
const RELEASE: f32 = 0.1;
const PEAK_GAIN: f32 = 0.2;
/// Gain at the end of the release ramp.
const FLOOR_GAIN: f32 = 0.001;
/// The oscillator keeps running this long past the nominal duration.
const TAIL: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    #[default]
    Triangle,
}

impl Waveform {
    /// Oscillator value for a phase in `[0, 1)`.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
        }
    }
}

/// A request to play one tone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    pub frequency: f32,
    /// Seconds, at least [`MIN_TONE_DURATION`]
    pub duration: f32,
    pub waveform: Waveform,
}

impl Tone {
    pub fn new(frequency: f32, duration: f32, waveform: Waveform) -> Self {
        Self {
            frequency,
            duration: duration.max(MIN_TONE_DURATION),
            waveform,
        }
    }
}

/// Envelope gain at `t` seconds into a tone of `duration` seconds.
///
/// Tones shorter than attack plus release ramp up to the peak at half the
/// duration and straight back down, so the two ramps never overlap.
pub fn envelope_gain(t: f32, duration: f32) -> f32 {
    if t < 0.0 {
        return 0.0;
    }
    if t >= duration {
        return if t < duration + TAIL { FLOOR_GAIN } else { 0.0 };
    }

    if duration < ATTACK + RELEASE {
        let mid = duration / 2.0;
        if t < mid {
            PEAK_GAIN * t / mid
        } else {
            PEAK_GAIN + (FLOOR_GAIN - PEAK_GAIN) * (t - mid) / (duration - mid)
        }
    } else if t < ATTACK {
        PEAK_GAIN * t / ATTACK
    } else if t < duration - RELEASE {
        PEAK_GAIN
    } else {
        let into_release = t - (duration - RELEASE);
        PEAK_GAIN + (FLOOR_GAIN - PEAK_GAIN) * into_release / RELEASE
    }
}

/// A tone being rendered at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct ToneVoice {
    tone: Tone,
    phase: f32,
    phase_step: f32,
    elapsed: f32,
    dt: f32,
}

impl ToneVoice {
    pub fn new(tone: Tone, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        Self {
            tone,
            phase: 0.0,
            phase_step: tone.frequency / sample_rate,
            elapsed: 0.0,
            dt: 1.0 / sample_rate,
        }
    }

    /// Renders the next sample and advances the voice.
    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let value = self.tone.waveform.sample(self.phase) * envelope_gain(self.elapsed, self.tone.duration);
        self.phase = (self.phase + self.phase_step).fract();
        self.elapsed += self.dt;
        value
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.tone.duration + TAIL
    }
}

/// Sums a set of voices into an interleaved buffer and drops finished ones.
pub fn mix_voices(voices: &mut Vec<ToneVoice>, output: &mut [f32], channels: usize) {
    let channels = channels.max(1);
    for frame in output.chunks_mut(channels) {
        let value: f32 = voices.iter_mut().map(ToneVoice::next_sample).sum();
        frame.fill(value.clamp(-1.0, 1.0));
    }
    voices.retain(|v| !v.is_finished());
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn tones_have_minimum_duration() {
        assert_eq!(Tone::new(440.0, 0.01, Waveform::Sine).duration, MIN_TONE_DURATION);
        assert_eq!(Tone::new(440.0, 0.8, Waveform::Sine).duration, 0.8);
    }

    #[test]
    fn normal_envelope_shape() {
        assert_abs_diff_eq!(envelope_gain(0.0, 0.8), 0.0);
        assert_abs_diff_eq!(envelope_gain(0.025, 0.8), 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(envelope_gain(0.4, 0.8), PEAK_GAIN);
        assert_abs_diff_eq!(envelope_gain(0.75, 0.8), 0.1005, epsilon = 1e-4);
        assert_abs_diff_eq!(envelope_gain(0.85, 0.8), FLOOR_GAIN);
        assert_abs_diff_eq!(envelope_gain(1.0, 0.8), 0.0);
    }

    #[test]
    fn short_envelope_peaks_at_midpoint() {
        assert_abs_diff_eq!(envelope_gain(0.05, 0.1), PEAK_GAIN, epsilon = 1e-6);
        assert!(envelope_gain(0.025, 0.1) < PEAK_GAIN);
        assert!(envelope_gain(0.099, 0.1) < 0.01);
    }

    #[test]
    fn triangle_waveform_corners() {
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.0), 0.0);
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.25), 1.0);
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.5), 0.0);
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.75), -1.0);
    }

    #[test]
    fn voice_finishes_after_duration_and_tail() {
        let mut voice = ToneVoice::new(Tone::new(880.0, 0.1, Waveform::Sine), 1000);
        let rendered: Vec<f32> = (0..300).map(|_| voice.next_sample()).collect();
        assert!(voice.is_finished());
        assert!(rendered.iter().all(|s| s.abs() <= PEAK_GAIN + 1e-6));
        assert!(rendered[250..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mixing_fills_every_channel_and_drops_finished_voices() {
        let mut voices = vec![ToneVoice::new(Tone::new(440.0, 0.1, Waveform::Square), 100)];
        let mut out = vec![0.0; 2 * 30];
        mix_voices(&mut voices, &mut out, 2);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(voices.is_empty());
    }
}
