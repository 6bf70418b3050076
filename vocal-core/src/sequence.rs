//! # Melody Sequence Module
//!
//! Generates short, singable melodies: notes come from a fixed diatonic scale
//! and move by steps or thirds so every interval is easy to reproduce.

use rand::Rng;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;

/// C major from La2 (45) up to Mi4 (64).
pub const DIATONIC_SCALE: [i32; 12] = [45, 47, 48, 50, 52, 53, 55, 57, 59, 60, 62, 64];

/// Melody used when the requested range contains no scale note (Do3, Re3, Mi3).
pub const FALLBACK_SEQUENCE: [i32; 3] = [48, 50, 52];

/// Lowest and highest MIDI notes the trainer draws melodies from.
pub const USABLE_RANGE: (i32, i32) = (45, 64);

pub const MIN_LENGTH: usize = 2;
pub const MAX_LENGTH: usize = 5;

/// Largest jump between consecutive notes, in scale degrees.
const MAX_JUMP: usize = 2;

/// An immutable melody of MIDI note numbers.
///
/// Cloning shares the notes; a new round always builds a new sequence, so a
/// clone held by an earlier round keeps seeing its own melody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sequence(Arc<[i32]>);

impl Sequence {
    pub fn new(notes: impl Into<Arc<[i32]>>) -> Self {
        Self(notes.into())
    }

    pub fn notes(&self) -> &[i32] {
        &self.0
    }
}

impl Deref for Sequence {
    type Target = [i32];

    fn deref(&self) -> &[i32] {
        &self.0
    }
}

impl From<Vec<i32>> for Sequence {
    fn from(notes: Vec<i32>) -> Self {
        Self(notes.into())
    }
}

/// Generates a melody with the thread-local RNG.
pub fn generate(length: usize, min_midi: i32, max_midi: i32) -> Sequence {
    generate_with(&mut rand::thread_rng(), length, min_midi, max_midi)
}

/// Generates a melody of `length` notes within `[min_midi, max_midi]`.
///
/// The first note is picked uniformly from the scale notes in range; each
/// following note moves one or two scale degrees up or down. A step past the
/// low edge bounces to the second note, a step past the high edge to the
/// second-to-last, so melodies do not stick to the boundary.
///
/// # Arguments
/// * `rng` - Random source
/// * `length` - Number of notes, clamped to 2..=5
/// * `min_midi`, `max_midi` - Inclusive MIDI range
///
/// # Returns
/// The melody, or [`FALLBACK_SEQUENCE`] when no scale note is in range.
pub fn generate_with<R: Rng + ?Sized>(
    rng: &mut R,
    length: usize,
    min_midi: i32,
    max_midi: i32,
) -> Sequence {
    let available: Vec<i32> = DIATONIC_SCALE
        .iter()
        .copied()
        .filter(|&n| n >= min_midi && n <= max_midi)
        .collect();

    if available.is_empty() {
        log::warn!(
            target: "sequence",
            "no scale notes in {min_midi}..={max_midi}, using fallback melody"
        );
        return Sequence::from(FALLBACK_SEQUENCE.to_vec());
    }

    let clamped = length.clamp(MIN_LENGTH, MAX_LENGTH);
    if clamped != length {
        log::warn!(target: "sequence", "sequence length {length} clamped to {clamped}");
    }

    let last = available.len() as isize - 1;
    let mut index = rng.gen_range(0..available.len()) as isize;
    let mut notes = Vec::with_capacity(clamped);
    notes.push(available[index as usize]);

    for _ in 1..clamped {
        let jump = rng.gen_range(1..=MAX_JUMP) as isize;
        let direction = if rng.gen_bool(0.5) { 1 } else { -1 };

        let mut next = index + direction * jump;
        if next < 0 {
            next = 1.min(last);
        }
        if next > last {
            next = (last - 1).max(0);
        }

        index = next;
        notes.push(available[index as usize]);
    }

    Sequence::from(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn scale_index(midi: i32) -> isize {
        DIATONIC_SCALE.iter().position(|&n| n == midi).unwrap() as isize
    }

    #[test]
    fn produces_requested_length_within_range_and_steps() {
        let mut rng = Pcg32::seed_from_u64(7);
        let ranges = [(45, 64), (48, 60), (50, 53), (59, 64), (44, 46)];
        for _ in 0..200 {
            for &(lo, hi) in &ranges {
                for length in MIN_LENGTH..=MAX_LENGTH {
                    let seq = generate_with(&mut rng, length, lo, hi);
                    assert_eq!(seq.len(), length);
                    assert!(seq.iter().all(|&n| n >= lo && n <= hi), "{seq:?} in {lo}..={hi}");
                    for pair in seq.windows(2) {
                        let step = (scale_index(pair[1]) - scale_index(pair[0])).abs();
                        assert!(step <= 2, "{seq:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn empty_intersection_uses_fallback() {
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(generate_with(&mut rng, 4, 70, 80).notes(), &FALLBACK_SEQUENCE);
        assert_eq!(generate_with(&mut rng, 2, 46, 46).notes(), &FALLBACK_SEQUENCE);
    }

    #[test]
    fn single_note_range_repeats_that_note() {
        let mut rng = Pcg32::seed_from_u64(3);
        let seq = generate_with(&mut rng, 5, 52, 52);
        assert_eq!(seq.notes(), &[52, 52, 52, 52, 52]);
    }

    #[test]
    fn out_of_range_length_is_clamped() {
        let mut rng = Pcg32::seed_from_u64(11);
        assert_eq!(generate_with(&mut rng, 0, 45, 64).len(), MIN_LENGTH);
        assert_eq!(generate_with(&mut rng, 9, 45, 64).len(), MAX_LENGTH);
    }

    #[test]
    fn same_seed_same_melody() {
        let a = generate_with(&mut Pcg32::seed_from_u64(42), 5, 45, 64);
        let b = generate_with(&mut Pcg32::seed_from_u64(42), 5, 45, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn clones_share_notes() {
        let seq = Sequence::from(vec![60, 62, 64]);
        let clone = seq.clone();
        assert!(std::ptr::eq(seq.notes(), clone.notes()));
    }
}
