#![allow(dead_code)]

use parking_lot::Mutex;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use vocal_core::audio::{AudioBlock, AudioDevice, InputHandle};
use vocal_core::error::{CoachError, Result};
use vocal_core::synth::Tone;
use vocal_core::tuning::midi_to_frequency;

pub const SAMPLE_RATE: u32 = 44100;
pub const BLOCK: usize = 2048;

#[derive(Debug, Default)]
pub struct DeviceState {
    pub frequency: Option<f32>,
    pub fail_acquire: bool,
    pub acquired: bool,
    pub acquisitions: u32,
    pub tones: Vec<Tone>,
    pub resumes: u32,
    pub stalled_output: bool,
    next_id: u64,
}

/// Scripted audio device. Clones share state, so a test can keep one handle
/// while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sings a pure tone at the given frequency, or silence for `None`.
    pub fn sing(&self, frequency: Option<f32>) {
        self.state.lock().frequency = frequency;
    }

    pub fn sing_midi(&self, midi: i32) {
        self.sing(Some(midi_to_frequency(midi)));
    }

    pub fn fail_acquire(&self, fail: bool) {
        self.state.lock().fail_acquire = fail;
    }

    pub fn is_acquired(&self) -> bool {
        self.state.lock().acquired
    }

    pub fn acquisitions(&self) -> u32 {
        self.state.lock().acquisitions
    }

    pub fn tones(&self) -> Vec<Tone> {
        self.state.lock().tones.clone()
    }

    /// Makes `resume` report that the output did not come back in time.
    pub fn stall_output(&self, stalled: bool) {
        self.state.lock().stalled_output = stalled;
    }

    pub fn resumes(&self) -> u32 {
        self.state.lock().resumes
    }
}

impl AudioDevice for FakeDevice {
    fn acquire_input(&mut self) -> Result<InputHandle> {
        let mut state = self.state.lock();
        if state.fail_acquire {
            return Err(CoachError::InputUnavailable("permission denied".into()));
        }
        state.next_id += 1;
        state.acquired = true;
        state.acquisitions += 1;
        Ok(InputHandle::new(state.next_id))
    }

    fn read_block(&mut self, _input: &InputHandle) -> Option<AudioBlock> {
        let state = self.state.lock();
        if !state.acquired {
            return None;
        }
        let samples = match state.frequency {
            Some(f) => (0..BLOCK)
                .map(|i| 0.5 * (2.0 * PI * f * i as f32 / SAMPLE_RATE as f32).sin())
                .collect(),
            None => vec![0.0; BLOCK],
        };
        Some(AudioBlock {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }

    fn release_input(&mut self, _input: InputHandle) {
        self.state.lock().acquired = false;
    }

    fn play_tone(&mut self, tone: Tone) -> anyhow::Result<()> {
        self.state.lock().tones.push(tone);
        Ok(())
    }

    fn resume(&mut self, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        state.resumes += 1;
        !state.stalled_output
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}
