//! # Repeat-After-Me Trainer
//!
//! A round plays a short melody, waits for the room to go quiet, then listens
//! to the singer one note at a time. Each step accumulates a score while the
//! sung note matches the target (any octave, within the cents tolerance) and
//! succeeds once the score reaches its target. Off-target ticks pause the
//! score rather than lowering it.
//!
//! Every timer belongs to the round that scheduled it. Starting, replaying or
//! stopping a round invalidates all of them, and step timers additionally
//! carry the step index they were scheduled for.

use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::Serialize;
use std::time::Duration;

use crate::audio::AudioDevice;
use crate::config::{CoachConfig, TrainerConfig};
use crate::error::{CoachError, Result};
use crate::listener::Listener;
use crate::persistence::ProgressStore;
use crate::sequence::{generate_with, Sequence, MAX_LENGTH, MIN_LENGTH};
use crate::synth::Tone;
use crate::timer::{TimerId, TimerQueue};
use crate::tuning::{midi_to_frequency, NoteInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerPhase {
    Setup,
    Playing,
    WaitingForSilence,
    Listening,
    Feedback,
}

impl TrainerPhase {
    fn as_str(self) -> &'static str {
        match self {
            TrainerPhase::Setup => "setup",
            TrainerPhase::Playing => "playing",
            TrainerPhase::WaitingForSilence => "waiting for silence",
            TrainerPhase::Listening => "listening",
            TrainerPhase::Feedback => "feedback",
        }
    }
}

/// Outcome of one step of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub target: i32,
    pub sung: Option<i32>,
    pub cents: Option<i32>,
    pub success: bool,
}

impl StepResult {
    fn pending(target: i32) -> Self {
        Self {
            target,
            sung: None,
            cents: None,
            success: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HintDirection {
    TooLow,
    OnTarget,
    TooHigh,
}

/// How far the sung note is from the nearest octave of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PitchHint {
    pub offset_cents: i32,
    pub direction: HintDirection,
}

impl PitchHint {
    pub fn new(note: &NoteInfo, target: i32, cents_tolerance: i32) -> Self {
        if matches_target(note, target, cents_tolerance) {
            return Self {
                offset_cents: 0,
                direction: HintDirection::OnTarget,
            };
        }

        let diff = note.midi - target;
        let octave = (diff as f32 / 12.0).round() as i32;
        let semitones = diff - octave * 12;
        let offset_cents = semitones * 100 + note.cents_off;

        let direction = match offset_cents {
            0 => HintDirection::OnTarget,
            c if c > 0 => HintDirection::TooHigh,
            _ => HintDirection::TooLow,
        };
        Self {
            offset_cents,
            direction,
        }
    }
}

/// Octave-tolerant match: same pitch class and within `cents_tolerance`.
pub fn matches_target(note: &NoteInfo, target: i32, cents_tolerance: i32) -> bool {
    (note.midi - target).abs() % 12 == 0 && note.cents_off.abs() <= cents_tolerance
}

/// Everything the presentation needs after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerSnapshot {
    pub phase: TrainerPhase,
    pub level: usize,
    pub sequence: Vec<i32>,
    /// Index of the tone being played, while playing
    pub playing_index: Option<usize>,
    /// Step being listened for
    pub step: usize,
    pub results: Vec<StepResult>,
    pub score: u32,
    pub score_target: u32,
    pub current_note: Option<NoteInfo>,
    pub hint: Option<PitchHint>,
    pub best_streak: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrainerEvent {
    PlayNote { index: usize },
    BeginListening,
    DetectionTick { step: usize },
    AdvanceStep { step: usize },
}

/// Trainer state machine, driven by [`Trainer::advance_to`].
pub struct Trainer<D: AudioDevice, S: ProgressStore> {
    config: TrainerConfig,
    resume_timeout: Duration,
    listener: Listener<D>,
    store: S,
    rng: Pcg32,
    timers: TimerQueue<TrainerEvent>,
    phase: TrainerPhase,
    level: usize,
    sequence: Option<Sequence>,
    results: Vec<StepResult>,
    step: usize,
    score: u32,
    playing_index: Option<usize>,
    tick_timer: Option<TimerId>,
    current_note: Option<NoteInfo>,
    last_error: Option<String>,
}

impl<D: AudioDevice, S: ProgressStore> Trainer<D, S> {
    pub fn new(config: &CoachConfig, device: D, store: S) -> Self {
        Self::with_rng(config, device, store, Pcg32::from_entropy())
    }

    /// Trainer with reproducible melodies.
    pub fn with_seed(config: &CoachConfig, device: D, store: S, seed: u64) -> Self {
        Self::with_rng(config, device, store, Pcg32::seed_from_u64(seed))
    }

    fn with_rng(config: &CoachConfig, device: D, store: S, rng: Pcg32) -> Self {
        Self {
            config: config.trainer.clone(),
            resume_timeout: config.audio.resume_timeout(),
            listener: Listener::new(device, &config.detector),
            store,
            rng,
            timers: TimerQueue::new(),
            phase: TrainerPhase::Setup,
            level: config.trainer.level.clamp(MIN_LENGTH, MAX_LENGTH),
            sequence: None,
            results: Vec::new(),
            step: 0,
            score: 0,
            playing_index: None,
            tick_timer: None,
            current_note: None,
            last_error: None,
        }
    }

    /// Sets the number of notes per melody. Only allowed in setup.
    pub fn set_level(&mut self, level: usize) -> Result<()> {
        self.require_phase(TrainerPhase::Setup, "change the level")?;
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&level) {
            return Err(CoachError::InvalidLevel(level));
        }
        self.level = level;
        Ok(())
    }

    /// Starts a round with a fresh melody, replacing any round in progress.
    pub fn start(&mut self) -> Result<()> {
        let sequence = generate_with(
            &mut self.rng,
            self.level,
            self.config.scale_min,
            self.config.scale_max,
        );
        self.begin_round(sequence);
        Ok(())
    }

    /// Starts a round with a given melody, replacing any round in progress.
    pub fn start_with_sequence(&mut self, sequence: Sequence) -> Result<()> {
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&sequence.len()) {
            return Err(CoachError::InvalidLevel(sequence.len()));
        }
        self.begin_round(sequence);
        Ok(())
    }

    /// Plays the finished round's melody again with fresh results.
    pub fn replay(&mut self) -> Result<()> {
        self.require_phase(TrainerPhase::Feedback, "replay")?;
        let Some(sequence) = self.sequence.as_ref() else {
            return Err(CoachError::InvalidState {
                action: "replay",
                state: "without a melody",
            });
        };
        let sequence = Sequence::new(sequence.notes().to_vec());
        self.begin_round(sequence);
        Ok(())
    }

    /// Leaves the feedback screen for setup.
    pub fn next(&mut self) -> Result<()> {
        self.require_phase(TrainerPhase::Feedback, "move to the next exercise")?;
        self.reset_to_setup();
        Ok(())
    }

    /// Abandons whatever is running and returns to setup.
    pub fn stop(&mut self) {
        if self.phase != TrainerPhase::Setup {
            log::info!(target: "trainer", "stopped while {}", self.phase.as_str());
        }
        self.reset_to_setup();
        self.last_error = None;
    }

    /// Fires every timer due up to `now`.
    ///
    /// # Returns
    /// * `Ok(())` - All due timers handled
    /// * `Err(CoachError::InputUnavailable)` - The microphone could not be
    ///   opened; the trainer is back in setup with the error in its snapshot
    ///
    /// The clock reaches `now` either way.
    pub fn advance_to(&mut self, now: Duration) -> Result<()> {
        let mut outcome = Ok(());
        while let Some(event) = self.timers.pop_due(now) {
            if let Err(e) = self.handle(event) {
                outcome = Err(e);
                break;
            }
        }
        self.timers.advance_to(now);
        outcome
    }

    pub fn advance_by(&mut self, elapsed: Duration) -> Result<()> {
        let now = self.timers.now() + elapsed;
        self.advance_to(now)
    }

    pub fn now(&self) -> Duration {
        self.timers.now()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn sequence(&self) -> Option<&Sequence> {
        self.sequence.as_ref()
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> TrainerSnapshot {
        let target = self.current_target();
        let hint = match (self.phase, self.current_note, target) {
            (TrainerPhase::Listening, Some(note), Some(target)) => {
                Some(PitchHint::new(&note, target, self.config.cents_tolerance))
            }
            _ => None,
        };

        TrainerSnapshot {
            phase: self.phase,
            level: self.level,
            sequence: self
                .sequence
                .as_ref()
                .map(|s| s.notes().to_vec())
                .unwrap_or_default(),
            playing_index: self.playing_index,
            step: self.step,
            results: self.results.clone(),
            score: self.score.min(self.config.score_target),
            score_target: self.config.score_target,
            current_note: self.current_note,
            hint,
            best_streak: self.store.streak(),
            error: self.last_error.clone(),
        }
    }

    /// Stops the trainer and hands back the device and store.
    pub fn into_parts(mut self) -> (D, S) {
        self.teardown();
        (self.listener.into_device(), self.store)
    }

    fn handle(&mut self, event: TrainerEvent) -> Result<()> {
        match event {
            TrainerEvent::PlayNote { index } => self.on_play_note(index),
            TrainerEvent::BeginListening => return self.on_begin_listening(),
            TrainerEvent::DetectionTick { step } => self.on_detection_tick(step),
            TrainerEvent::AdvanceStep { step } => self.on_advance_step(step),
        }
        Ok(())
    }

    fn begin_round(&mut self, sequence: Sequence) {
        self.teardown();

        log::info!(target: "trainer", "new round {:?}", sequence.notes());
        self.results = sequence.iter().map(|&n| StepResult::pending(n)).collect();
        self.sequence = Some(sequence);
        self.step = 0;
        self.score = 0;
        self.playing_index = None;
        self.last_error = None;
        self.phase = TrainerPhase::Playing;

        if !self.listener.device_mut().resume(self.resume_timeout) {
            log::warn!(target: "trainer", "audio output did not resume in time, continuing");
        }

        self.timers.schedule(
            Duration::from_millis(self.config.lead_in_ms),
            TrainerEvent::PlayNote { index: 0 },
        );
    }

    fn on_play_note(&mut self, index: usize) {
        if self.phase != TrainerPhase::Playing {
            return;
        }
        let Some(midi) = self.sequence.as_ref().and_then(|s| s.get(index).copied()) else {
            self.playing_index = None;
            self.phase = TrainerPhase::WaitingForSilence;
            log::debug!(target: "trainer", "melody played, waiting for silence");
            self.timers.schedule(
                Duration::from_millis(self.config.silence_wait_ms),
                TrainerEvent::BeginListening,
            );
            return;
        };

        self.playing_index = Some(index);
        self.listener.play_tone(Tone::new(
            midi_to_frequency(midi),
            self.config.tone_duration_secs,
            self.config.tone_waveform,
        ));
        self.timers.schedule(
            Duration::from_millis(self.config.tone_spacing_ms),
            TrainerEvent::PlayNote { index: index + 1 },
        );
    }

    fn on_begin_listening(&mut self) -> Result<()> {
        if self.phase != TrainerPhase::WaitingForSilence {
            return Ok(());
        }

        if let Err(e) = self.listener.open() {
            log::error!(target: "trainer", "cannot listen: {e}");
            self.reset_to_setup();
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        self.phase = TrainerPhase::Listening;
        self.start_step(0);
        Ok(())
    }

    fn start_step(&mut self, step: usize) {
        if let Some(timer) = self.tick_timer.take() {
            self.timers.cancel(timer);
        }

        if step >= self.results.len() {
            self.finish_round();
            return;
        }

        self.step = step;
        self.score = 0;
        log::debug!(target: "trainer", "listening for step {step}");
        self.tick_timer = Some(self.timers.schedule(
            Duration::from_millis(self.config.warmup_ms),
            TrainerEvent::DetectionTick { step },
        ));
    }

    fn on_detection_tick(&mut self, step: usize) {
        if self.phase != TrainerPhase::Listening || step != self.step {
            return;
        }
        self.tick_timer = None;

        let note = self.listener.read_note();
        self.current_note = note;

        if let (Some(note), Some(target)) = (note, self.current_target()) {
            if matches_target(&note, target, self.config.cents_tolerance) {
                self.score += self.config.score_increment;
                if self.score >= self.config.score_target {
                    self.on_step_success(step, note);
                    return;
                }
            }
        }

        self.tick_timer = Some(self.timers.schedule(
            Duration::from_millis(self.config.tick_ms),
            TrainerEvent::DetectionTick { step },
        ));
    }

    fn on_step_success(&mut self, step: usize, note: NoteInfo) {
        self.score = self.config.score_target;
        if let Some(result) = self.results.get_mut(step) {
            result.sung = Some(note.midi);
            result.cents = Some(note.cents_off);
            result.success = true;
        }
        log::debug!(target: "trainer", "step {step} matched with {}", note.label());

        self.listener.play_tone(Tone::new(
            self.config.success_tone_hz,
            self.config.success_tone_secs,
            self.config.tone_waveform,
        ));
        self.timers.schedule(
            Duration::from_millis(self.config.success_pause_ms),
            TrainerEvent::AdvanceStep { step },
        );
    }

    fn on_advance_step(&mut self, step: usize) {
        if self.phase != TrainerPhase::Listening || step != self.step {
            return;
        }
        self.start_step(step + 1);
    }

    fn finish_round(&mut self) {
        self.timers.invalidate_all();
        self.tick_timer = None;
        self.listener.close();
        self.current_note = None;
        self.phase = TrainerPhase::Feedback;

        let hits = self.results.iter().filter(|r| r.success).count();
        log::info!(target: "trainer", "round finished, {hits}/{} notes", self.results.len());

        if hits == self.results.len() && !self.results.is_empty() {
            let streak = self.store.streak() + 1;
            if let Err(e) = self.store.set_streak(streak) {
                log::warn!(target: "trainer", "streak {streak} not saved: {e}");
            }
        }
    }

    fn current_target(&self) -> Option<i32> {
        self.sequence.as_ref().and_then(|s| s.get(self.step).copied())
    }

    fn require_phase(&self, phase: TrainerPhase, action: &'static str) -> Result<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(CoachError::InvalidState {
                action,
                state: self.phase.as_str(),
            })
        }
    }

    fn reset_to_setup(&mut self) {
        self.teardown();
        self.phase = TrainerPhase::Setup;
        self.sequence = None;
        self.results.clear();
        self.step = 0;
        self.score = 0;
        self.playing_index = None;
    }

    fn teardown(&mut self) {
        self.timers.invalidate_all();
        self.tick_timer = None;
        self.listener.close();
        self.current_note = None;
    }
}
