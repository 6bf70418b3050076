//! # Vocal Range Finder
//!
//! Two-phase test: the singer slides down to their lowest comfortable note,
//! confirms, then up to the highest. A record only moves after the detector
//! reports the same note for several consecutive ticks, and only toward the
//! extreme of the phase, so a momentary glitch can neither set nor undo it.

use serde::Serialize;
use std::time::Duration;

use crate::audio::AudioDevice;
use crate::config::CoachConfig;
use crate::config::RangeFinderConfig;
use crate::error::{CoachError, Result};
use crate::listener::Listener;
use crate::persistence::{ProgressStore, SavedRange};
use crate::timer::TimerQueue;
use crate::tuning::{format_note, NoteInfo, TuningZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStatus {
    Idle,
    Testing,
    Done,
}

impl RangeStatus {
    fn as_str(self) -> &'static str {
        match self {
            RangeStatus::Idle => "idle",
            RangeStatus::Testing => "testing",
            RangeStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePhase {
    Low,
    High,
}

/// Broad voice category derived from the centre of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceType {
    /// Soprano-like
    High,
    /// Mezzo or tenor-like
    MediumHigh,
    /// Baritone-like
    MediumLow,
    /// Bass or contralto-like
    Low,
}

/// Result of a completed range test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VocalRange {
    pub low_midi: i32,
    pub high_midi: i32,
}

impl VocalRange {
    pub fn new(low_midi: i32, high_midi: i32) -> Self {
        Self { low_midi, high_midi }
    }

    pub fn voice_type(&self) -> VoiceType {
        let center = (self.low_midi + self.high_midi) as f32 / 2.0;
        if center >= 69.0 {
            VoiceType::High
        } else if center >= 60.0 {
            VoiceType::MediumHigh
        } else if center >= 53.0 {
            VoiceType::MediumLow
        } else {
            VoiceType::Low
        }
    }

    pub fn to_saved(&self) -> SavedRange {
        SavedRange::from_midi(self.low_midi, self.high_midi)
    }

    pub fn label(&self) -> String {
        format!("{} - {}", format_note(self.low_midi), format_note(self.high_midi))
    }
}

/// What a phase confirmation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Low phase stored; the high phase is now running.
    Advanced,
    /// Both ends known; the test is over.
    Finished(VocalRange),
    /// Nothing recorded and nothing currently sung.
    NoReading,
}

/// Everything the presentation needs after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeSnapshot {
    pub status: RangeStatus,
    pub phase: RangePhase,
    pub current_note: Option<NoteInfo>,
    pub zone: Option<TuningZone>,
    pub record_low: Option<NoteInfo>,
    pub record_high: Option<NoteInfo>,
    pub can_confirm: bool,
    pub result: Option<VocalRange>,
    pub voice_type: Option<VoiceType>,
    /// Range stored by an earlier test, shown before a new one starts.
    pub saved_range: Option<SavedRange>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeEvent {
    Tick,
}

/// Range test state machine, driven by [`RangeFinder::advance_to`].
pub struct RangeFinder<D: AudioDevice, S: ProgressStore> {
    config: RangeFinderConfig,
    listener: Listener<D>,
    store: S,
    timers: TimerQueue<RangeEvent>,
    status: RangeStatus,
    phase: RangePhase,
    record_low: Option<NoteInfo>,
    record_high: Option<NoteInfo>,
    stability: u32,
    last_midi: Option<i32>,
    current_note: Option<NoteInfo>,
    result: Option<VocalRange>,
    last_error: Option<String>,
}

impl<D: AudioDevice, S: ProgressStore> RangeFinder<D, S> {
    pub fn new(config: &CoachConfig, device: D, store: S) -> Self {
        Self {
            config: config.range_finder.clone(),
            listener: Listener::new(device, &config.detector),
            store,
            timers: TimerQueue::new(),
            status: RangeStatus::Idle,
            phase: RangePhase::Low,
            record_low: None,
            record_high: None,
            stability: 0,
            last_midi: None,
            current_note: None,
            result: None,
            last_error: None,
        }
    }

    /// Starts (or restarts) the test at the low phase.
    ///
    /// # Returns
    /// * `Ok(())` - Microphone open, ticks scheduled
    /// * `Err(CoachError::InputUnavailable)` - The test stays idle
    pub fn start(&mut self) -> Result<()> {
        self.teardown();
        self.record_low = None;
        self.record_high = None;
        self.result = None;
        self.last_error = None;
        self.phase = RangePhase::Low;

        if let Err(e) = self.listener.open() {
            log::error!(target: "range", "cannot start range test: {e}");
            self.status = RangeStatus::Idle;
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        self.status = RangeStatus::Testing;
        self.timers.schedule(self.config.tick(), RangeEvent::Tick);
        log::info!(target: "range", "range test started");
        Ok(())
    }

    /// Stops the test and returns to idle, keeping nothing but a finished result.
    pub fn stop(&mut self) {
        self.teardown();
        if self.status == RangeStatus::Testing {
            self.status = RangeStatus::Idle;
        }
    }

    /// Stores the current reading as the phase's record, ignoring stability.
    ///
    /// Returns `false` when nothing is being sung.
    pub fn manual_capture(&mut self) -> Result<bool> {
        self.require_testing("capture a note")?;
        let Some(note) = self.current_note else {
            return Ok(false);
        };
        match self.phase {
            RangePhase::Low => self.record_low = Some(note),
            RangePhase::High => self.record_high = Some(note),
        }
        log::debug!(target: "range", "manual capture {} in {:?} phase", note.label(), self.phase);
        Ok(true)
    }

    /// Clears the record of the current phase only.
    pub fn reset_phase(&mut self) -> Result<()> {
        self.require_testing("reset the phase")?;
        match self.phase {
            RangePhase::Low => self.record_low = None,
            RangePhase::High => self.record_high = None,
        }
        self.stability = 0;
        Ok(())
    }

    /// Confirms the current phase.
    ///
    /// A missing record falls back to the current reading. Confirming the
    /// high phase ends the test, releases the microphone and saves the range.
    pub fn confirm_phase(&mut self) -> Result<ConfirmOutcome> {
        self.require_testing("confirm a phase")?;

        match self.phase {
            RangePhase::Low => {
                let Some(low) = self.record_low.or(self.current_note) else {
                    return Ok(ConfirmOutcome::NoReading);
                };
                self.record_low = Some(low);
                self.phase = RangePhase::High;
                self.stability = 0;
                log::info!(target: "range", "low end confirmed at {}", low.label());
                Ok(ConfirmOutcome::Advanced)
            }
            RangePhase::High => {
                let Some(high) = self.record_high.or(self.current_note) else {
                    return Ok(ConfirmOutcome::NoReading);
                };
                let low = self.record_low.unwrap_or(high);
                self.record_high = Some(high);

                let range = VocalRange::new(low.midi, high.midi);
                self.teardown();
                self.status = RangeStatus::Done;
                self.result = Some(range);

                if let Err(e) = self.store.set_saved_range(&range.to_saved()) {
                    log::warn!(target: "range", "range {} not saved: {e}", range.label());
                }
                log::info!(target: "range", "range test finished: {}", range.label());
                Ok(ConfirmOutcome::Finished(range))
            }
        }
    }

    pub fn can_confirm(&self) -> bool {
        if self.status != RangeStatus::Testing {
            return false;
        }
        let record = match self.phase {
            RangePhase::Low => self.record_low,
            RangePhase::High => self.record_high,
        };
        record.is_some() || self.current_note.is_some()
    }

    /// Fires every timer due up to `now`.
    pub fn advance_to(&mut self, now: Duration) {
        while let Some(event) = self.timers.pop_due(now) {
            match event {
                RangeEvent::Tick => self.on_tick(),
            }
        }
        self.timers.advance_to(now);
    }

    pub fn advance_by(&mut self, elapsed: Duration) {
        let now = self.timers.now() + elapsed;
        self.advance_to(now);
    }

    pub fn now(&self) -> Duration {
        self.timers.now()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn status(&self) -> RangeStatus {
        self.status
    }

    pub fn phase(&self) -> RangePhase {
        self.phase
    }

    pub fn result(&self) -> Option<VocalRange> {
        self.result
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> RangeSnapshot {
        RangeSnapshot {
            status: self.status,
            phase: self.phase,
            current_note: self.current_note,
            zone: self.current_note.map(|n| TuningZone::from_cents(n.cents_off)),
            record_low: self.record_low,
            record_high: self.record_high,
            can_confirm: self.can_confirm(),
            result: self.result,
            voice_type: self.result.map(|r| r.voice_type()),
            saved_range: self.store.saved_range(),
            error: self.last_error.clone(),
        }
    }

    /// Stops the test and hands back the device and store.
    pub fn into_parts(mut self) -> (D, S) {
        self.teardown();
        (self.listener.into_device(), self.store)
    }

    fn on_tick(&mut self) {
        if self.status != RangeStatus::Testing {
            return;
        }

        let note = self.listener.read_note();
        self.current_note = note;

        match note {
            Some(note) => {
                if self.last_midi == Some(note.midi) {
                    self.stability += 1;
                } else {
                    self.stability = 0;
                    self.last_midi = Some(note.midi);
                }
                if self.stability > self.config.stability_threshold {
                    self.update_record(note);
                }
            }
            None => {
                self.stability = 0;
                self.last_midi = None;
            }
        }

        self.timers.schedule(self.config.tick(), RangeEvent::Tick);
    }

    fn update_record(&mut self, note: NoteInfo) {
        let record = match self.phase {
            RangePhase::Low => &mut self.record_low,
            RangePhase::High => &mut self.record_high,
        };
        let better = match (self.phase, *record) {
            (_, None) => true,
            (RangePhase::Low, Some(r)) => note.midi < r.midi,
            (RangePhase::High, Some(r)) => note.midi > r.midi,
        };
        if better {
            log::debug!(target: "range", "new {:?} record {}", self.phase, note.label());
            *record = Some(note);
        }
    }

    fn require_testing(&self, action: &'static str) -> Result<()> {
        if self.status == RangeStatus::Testing {
            Ok(())
        } else {
            Err(CoachError::InvalidState {
                action,
                state: self.status.as_str(),
            })
        }
    }

    fn teardown(&mut self) {
        self.timers.invalidate_all();
        self.listener.close();
        self.current_note = None;
        self.stability = 0;
        self.last_midi = None;
    }
}
