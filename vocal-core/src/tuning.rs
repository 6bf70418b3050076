//! # Musical Tuning Module
//!
//! Converts between frequencies, MIDI note numbers and solfège note names
//! using twelve-tone equal temperament with A4 = 440 Hz.
//!
//! ## Features
//! - Frequency to nearest note with cent deviation
//! - MIDI to frequency conversion
//! - Note formatting ("Do4", "Sol#2") and parsing back to MIDI
//! - Tuning gauge zones for display

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lowest frequency accepted as a sung or whistled pitch.
pub const MIN_FREQUENCY: f32 = 50.0;
/// Highest frequency accepted as a sung or whistled pitch.
pub const MAX_FREQUENCY: f32 = 2000.0;

const A4_FREQUENCY: f64 = 440.0;
const A4_MIDI: i32 = 69;

/// The twelve chromatic note names, starting at Do (C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteName {
    #[serde(rename = "Do")]
    Do,
    #[serde(rename = "Do#")]
    DoSharp,
    #[serde(rename = "Re")]
    Re,
    #[serde(rename = "Re#")]
    ReSharp,
    #[serde(rename = "Mi")]
    Mi,
    #[serde(rename = "Fa")]
    Fa,
    #[serde(rename = "Fa#")]
    FaSharp,
    #[serde(rename = "Sol")]
    Sol,
    #[serde(rename = "Sol#")]
    SolSharp,
    #[serde(rename = "La")]
    La,
    #[serde(rename = "La#")]
    LaSharp,
    #[serde(rename = "Si")]
    Si,
}

impl NoteName {
    pub const ALL: [NoteName; 12] = [
        NoteName::Do,
        NoteName::DoSharp,
        NoteName::Re,
        NoteName::ReSharp,
        NoteName::Mi,
        NoteName::Fa,
        NoteName::FaSharp,
        NoteName::Sol,
        NoteName::SolSharp,
        NoteName::La,
        NoteName::LaSharp,
        NoteName::Si,
    ];

    /// Name of the pitch class of a MIDI note number.
    pub fn from_midi(midi: i32) -> Self {
        Self::ALL[midi.rem_euclid(12) as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::Do => "Do",
            NoteName::DoSharp => "Do#",
            NoteName::Re => "Re",
            NoteName::ReSharp => "Re#",
            NoteName::Mi => "Mi",
            NoteName::Fa => "Fa",
            NoteName::FaSharp => "Fa#",
            NoteName::Sol => "Sol",
            NoteName::SolSharp => "Sol#",
            NoteName::La => "La",
            NoteName::LaSharp => "La#",
            NoteName::Si => "Si",
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the cent deviation is reduced to an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentsRounding {
    /// Round to the nearest cent (symmetric around zero).
    #[default]
    Nearest,
    /// Floor toward negative infinity; -0.4 cents becomes -1, +0.4 becomes 0.
    Floor,
}

impl CentsRounding {
    fn apply(self, cents: f64) -> i32 {
        match self {
            CentsRounding::Nearest => cents.round() as i32,
            CentsRounding::Floor => cents.floor() as i32,
        }
    }
}

/// A detected pitch mapped onto the nearest equal-tempered note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteInfo {
    /// Detected frequency in Hz
    pub frequency: f32,
    pub name: NoteName,
    pub octave: i32,
    /// Nearest MIDI note number (69 = A4)
    pub midi: i32,
    /// Signed deviation from the nearest note, in cents
    pub cents_off: i32,
}

impl NoteInfo {
    /// Note name plus octave, e.g. "La3".
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

/// Finds the nearest note to a frequency, rounding cents to the nearest value.
///
/// # Returns
/// * `Some(note)` - The nearest note and its deviation
/// * `None` - Frequency outside 50..=2000 Hz or not finite
pub fn frequency_to_note(frequency: f32) -> Option<NoteInfo> {
    frequency_to_note_with(frequency, CentsRounding::Nearest)
}

/// Finds the nearest note to a frequency using the given cents rounding.
///
/// This is the only place where degenerate detector output (infinite, NaN,
/// or out of the voice range) is turned into "no pitch".
///
/// # Arguments
/// * `frequency` - Measured frequency in Hz
/// * `rounding` - How the cent deviation is reduced to an integer
pub fn frequency_to_note_with(frequency: f32, rounding: CentsRounding) -> Option<NoteInfo> {
    if !frequency.is_finite() || !(MIN_FREQUENCY..=MAX_FREQUENCY).contains(&frequency) {
        return None;
    }

    let semitones = 12.0 * (frequency as f64 / A4_FREQUENCY).log2();
    let midi = nearest_midi(semitones);

    let exact = midi_to_frequency_f64(midi);
    let cents = 1200.0 * (frequency as f64 / exact).log2();

    Some(NoteInfo {
        frequency,
        name: NoteName::from_midi(midi),
        octave: octave_of(midi),
        midi,
        cents_off: rounding.apply(cents),
    })
}

/// Rounds a distance from A4 in semitones to a MIDI number, half up.
///
/// A reading exactly between two notes goes to the higher one, on both sides
/// of A4 (`f64::round` would send -0.5 down instead).
fn nearest_midi(semitones: f64) -> i32 {
    (semitones + 0.5).floor() as i32 + A4_MIDI
}

/// Equal temperament frequency of a MIDI note.
pub fn midi_to_frequency(midi: i32) -> f32 {
    midi_to_frequency_f64(midi) as f32
}

fn midi_to_frequency_f64(midi: i32) -> f64 {
    A4_FREQUENCY * 2.0_f64.powf((midi - A4_MIDI) as f64 / 12.0)
}

fn octave_of(midi: i32) -> i32 {
    midi.div_euclid(12) - 1
}

/// Formats a MIDI note as name plus octave (`60` -> `"Do4"`).
pub fn format_note(midi: i32) -> String {
    format!("{}{}", NoteName::from_midi(midi), octave_of(midi))
}

/// Lookup from formatted note names back to MIDI numbers, for the full MIDI range.
static NOTE_MAP: Lazy<BTreeMap<String, i32>> =
    Lazy::new(|| (0..=127).map(|midi| (format_note(midi), midi)).collect());

/// Parses a formatted note name ("Sol#3") back into a MIDI number.
///
/// # Returns
/// * `Some(midi)` - MIDI number in 0..=127
/// * `None` - The text is not a note produced by [`format_note`]
pub fn parse_note(name: &str) -> Option<i32> {
    NOTE_MAP.get(name.trim()).copied()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Colour band of the tuning gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningZone {
    /// Within 30 cents
    InTune,
    /// Within 50 cents
    Close,
    OutOfTune,
}

impl TuningZone {
    pub fn from_cents(cents: i32) -> Self {
        match cents.unsigned_abs() {
            0..=30 => TuningZone::InTune,
            31..=50 => TuningZone::Close,
            _ => TuningZone::OutOfTune,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_maps_to_midi_69() {
        let note = frequency_to_note(440.0).unwrap();
        assert_eq!(note.midi, 69);
        assert_eq!(note.name, NoteName::La);
        assert_eq!(note.octave, 4);
        assert_eq!(note.cents_off, 0);
    }

    #[test]
    fn rejects_frequencies_outside_voice_range() {
        assert!(frequency_to_note(49.9).is_none());
        assert!(frequency_to_note(2000.1).is_none());
        assert!(frequency_to_note(f32::INFINITY).is_none());
        assert!(frequency_to_note(f32::NAN).is_none());
        assert!(frequency_to_note(50.0).is_some());
        assert!(frequency_to_note(2000.0).is_some());
    }

    #[test]
    fn midi_matches_rounded_log_formula_across_range() {
        let mut f = 50.0_f32;
        while f < 2000.0 {
            let expected = (12.0 * (f as f64 / 440.0).log2() + 0.5).floor() as i32 + 69;
            assert_eq!(frequency_to_note(f).unwrap().midi, expected, "at {f} Hz");
            f *= 1.013;
        }
    }

    #[test]
    fn half_semitone_goes_to_the_higher_note() {
        assert_eq!(nearest_midi(0.5), 70);
        assert_eq!(nearest_midi(-0.5), 69);
        assert_eq!(nearest_midi(-1.5), 68);
        assert_eq!(nearest_midi(0.499_999), 69);

        // 440 * 2^(1/24) is about 452.8930 Hz; this f32 sits just above it.
        let tie_above_a4 = 452.893_f32;
        assert_eq!(frequency_to_note(tie_above_a4).unwrap().midi, 70);
        assert_eq!(frequency_to_note(452.89_f32).unwrap().midi, 69);
    }

    #[test]
    fn nearest_note_is_within_a_semitone() {
        for f in [55.0_f32, 98.3, 220.0, 311.1, 523.25, 1046.5, 1999.0] {
            let note = frequency_to_note(f).unwrap();
            let back = midi_to_frequency(note.midi);
            let semitones = 12.0 * (back / f).log2();
            assert!(semitones.abs() <= 1.0, "{f} -> {back}");
        }
    }

    #[test]
    fn cents_rounding_policies_differ_below_zero() {
        // About 0.4 cents flat of A4.
        let flat = 440.0 * 2.0_f32.powf(-0.4 / 1200.0);
        assert_eq!(frequency_to_note_with(flat, CentsRounding::Floor).unwrap().cents_off, -1);
        assert_eq!(frequency_to_note_with(flat, CentsRounding::Nearest).unwrap().cents_off, 0);

        let sharp = 440.0 * 2.0_f32.powf(0.4 / 1200.0);
        assert_eq!(frequency_to_note_with(sharp, CentsRounding::Floor).unwrap().cents_off, 0);
    }

    #[test]
    fn cents_follow_detuning() {
        let sharp = 261.63 * 2.0_f32.powf(25.0 / 1200.0);
        let note = frequency_to_note(sharp).unwrap();
        assert_eq!(note.midi, 60);
        assert!((note.cents_off - 25).abs() <= 1);
    }

    #[test]
    fn midi_to_frequency_reference_points() {
        assert_relative_eq!(midi_to_frequency(69), 440.0, epsilon = 1e-3);
        assert_relative_eq!(midi_to_frequency(57), 220.0, epsilon = 1e-3);
        assert_relative_eq!(midi_to_frequency(60), 261.6256, epsilon = 1e-3);
    }

    #[test]
    fn format_uses_floor_octave() {
        assert_eq!(format_note(60), "Do4");
        assert_eq!(format_note(45), "La2");
        assert_eq!(format_note(64), "Mi4");
        assert_eq!(format_note(61), "Do#4");
        assert_eq!(format_note(0), "Do-1");
    }

    #[test]
    fn parse_inverts_format() {
        for midi in 0..=127 {
            assert_eq!(parse_note(&format_note(midi)), Some(midi));
        }
        assert_eq!(parse_note("Sol#3"), Some(56));
        assert_eq!(parse_note("H4"), None);
    }

    #[test]
    fn label_matches_format() {
        let note = frequency_to_note(220.0).unwrap();
        assert_eq!(note.label(), format_note(note.midi));
    }

    #[test]
    fn tuning_zones() {
        assert_eq!(TuningZone::from_cents(0), TuningZone::InTune);
        assert_eq!(TuningZone::from_cents(-30), TuningZone::InTune);
        assert_eq!(TuningZone::from_cents(45), TuningZone::Close);
        assert_eq!(TuningZone::from_cents(-51), TuningZone::OutOfTune);
    }

    #[test]
    fn cents_deviation_octave_is_1200() {
        assert_relative_eq!(calculate_cents_deviation(880.0, 440.0), 1200.0, epsilon = 1e-3);
    }
}
