//! Exclusive microphone access for a session.
//!
//! A [`Listener`] owns the audio device and the pitch detector. While it is
//! open it holds the input stream; closing it releases the stream and drops
//! the detector's buffers, after which every read reports no pitch.

use crate::audio::{AudioDevice, InputHandle};
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::pitch::PitchDetector;
use crate::synth::Tone;
use crate::tuning::{frequency_to_note_with, CentsRounding, NoteInfo};

pub struct Listener<D: AudioDevice> {
    device: D,
    input: Option<InputHandle>,
    detector: PitchDetector,
    rounding: CentsRounding,
}

impl<D: AudioDevice> Listener<D> {
    pub fn new(device: D, config: &DetectorConfig) -> Self {
        Self {
            device,
            input: None,
            detector: PitchDetector::new(config),
            rounding: config.cents_rounding,
        }
    }

    /// Acquires the input stream. Opening an open listener is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.input.is_none() {
            self.input = Some(self.device.acquire_input()?);
        }
        Ok(())
    }

    /// Releases the input stream and clears analysis state.
    pub fn close(&mut self) {
        if let Some(input) = self.input.take() {
            self.device.release_input(input);
        }
        self.detector.reset();
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Reads one block and maps it to a note.
    ///
    /// # Returns
    /// * `Some(note)` - A pitch inside the voice range
    /// * `None` - Closed listener, no block yet, silence, or a degenerate estimate
    pub fn read_note(&mut self) -> Option<NoteInfo> {
        let input = self.input.as_ref()?;
        let block = self.device.read_block(input)?;
        let frequency = self.detector.detect(&block.samples, block.sample_rate)?;
        frequency_to_note_with(frequency, self.rounding)
    }

    /// Plays a tone, logging instead of failing.
    pub fn play_tone(&mut self, tone: Tone) {
        if let Err(e) = self.device.play_tone(tone) {
            log::warn!(target: "audio", "tone at {:.1} Hz not played: {e}", tone.frequency);
        }
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Closes the listener and hands the device back.
    pub fn into_device(mut self) -> D {
        self.close();
        self.device
    }
}
