// vocal-core/src/lib.rs

//! The core logic for the vocal coach.
//! This crate is responsible for pitch detection, note mapping, melody
//! generation and the two timer-driven exercises (range finder and trainer).
//! It is completely headless: audio hardware sits behind the `AudioDevice`
//! trait and presentation only ever sees session snapshots.

pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod listener;
pub mod persistence;
pub mod pitch;
pub mod range_finder;
pub mod runtime;
pub mod sequence;
pub mod synth;
pub mod timer;
pub mod trainer;
pub mod tuning;

pub use audio::{AudioBlock, AudioDevice, CpalDevice, InputHandle};
pub use config::CoachConfig;
pub use error::{CoachError, Result};
pub use persistence::{JsonFileStore, MemoryStore, ProgressStore, SavedRange};
pub use pitch::PitchDetector;
pub use range_finder::{ConfirmOutcome, RangeFinder, RangeSnapshot, VocalRange, VoiceType};
pub use runtime::{RangeCommand, Session, SessionRunner, TrainerCommand};
pub use sequence::Sequence;
pub use synth::{Tone, Waveform};
pub use trainer::{PitchHint, StepResult, Trainer, TrainerPhase, TrainerSnapshot};
pub use tuning::{NoteInfo, NoteName};
