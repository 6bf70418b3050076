//! # Session Runtime
//!
//! Runs one exercise engine on a dedicated worker thread. The engine is built
//! inside the thread from a factory, since audio streams may not be `Send`.
//! The worker waits for commands until the engine's next timer is due, fires
//! due timers against a monotonic clock, and publishes a snapshot after every
//! command or tick.

use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::AudioDevice;
use crate::error::Result;
use crate::persistence::ProgressStore;
use crate::range_finder::{RangeFinder, RangeSnapshot};
use crate::sequence::Sequence;
use crate::trainer::{Trainer, TrainerSnapshot};

/// Snapshots buffered for a slow observer before new ones are dropped.
pub const SNAPSHOT_QUEUE: usize = 32;

/// Longest wait when the engine has no pending timer.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// A timer-driven exercise engine.
pub trait Session {
    type Command: Send + 'static;
    type Snapshot: Send + 'static;

    fn apply(&mut self, command: Self::Command) -> Result<()>;
    fn advance_to(&mut self, now: Duration) -> Result<()>;
    fn next_deadline(&self) -> Option<Duration>;
    fn snapshot(&self) -> Self::Snapshot;
    /// Cancels timers and releases the microphone.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCommand {
    Start,
    Confirm,
    ManualCapture,
    ResetPhase,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerCommand {
    SetLevel(usize),
    Start,
    StartWith(Sequence),
    Replay,
    Next,
    Stop,
}

impl<D: AudioDevice, S: ProgressStore> Session for RangeFinder<D, S> {
    type Command = RangeCommand;
    type Snapshot = RangeSnapshot;

    fn apply(&mut self, command: RangeCommand) -> Result<()> {
        match command {
            RangeCommand::Start => self.start(),
            RangeCommand::Confirm => self.confirm_phase().map(|_| ()),
            RangeCommand::ManualCapture => self.manual_capture().map(|_| ()),
            RangeCommand::ResetPhase => self.reset_phase(),
            RangeCommand::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    fn advance_to(&mut self, now: Duration) -> Result<()> {
        RangeFinder::advance_to(self, now);
        Ok(())
    }

    fn next_deadline(&self) -> Option<Duration> {
        RangeFinder::next_deadline(self)
    }

    fn snapshot(&self) -> RangeSnapshot {
        RangeFinder::snapshot(self)
    }

    fn shutdown(&mut self) {
        self.stop();
    }
}

impl<D: AudioDevice, S: ProgressStore> Session for Trainer<D, S> {
    type Command = TrainerCommand;
    type Snapshot = TrainerSnapshot;

    fn apply(&mut self, command: TrainerCommand) -> Result<()> {
        match command {
            TrainerCommand::SetLevel(level) => self.set_level(level),
            TrainerCommand::Start => self.start(),
            TrainerCommand::StartWith(sequence) => self.start_with_sequence(sequence),
            TrainerCommand::Replay => self.replay(),
            TrainerCommand::Next => self.next(),
            TrainerCommand::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    fn advance_to(&mut self, now: Duration) -> Result<()> {
        Trainer::advance_to(self, now)
    }

    fn next_deadline(&self) -> Option<Duration> {
        Trainer::next_deadline(self)
    }

    fn snapshot(&self) -> TrainerSnapshot {
        Trainer::snapshot(self)
    }

    fn shutdown(&mut self) {
        self.stop();
    }
}

/// Handle to an engine running on its own thread.
///
/// Dropping the runner shuts the engine down and joins the thread.
pub struct SessionRunner<C, P> {
    commands: Sender<C>,
    snapshots: Receiver<P>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<C: Send + 'static, P: Send + 'static> SessionRunner<C, P> {
    /// Spawns the worker thread and builds the engine on it.
    pub fn spawn<S, F>(factory: F) -> std::io::Result<Self>
    where
        S: Session<Command = C, Snapshot = P>,
        F: FnOnce() -> S + Send + 'static,
    {
        let (command_tx, command_rx) = crossbeam_channel::unbounded::<C>();
        let (snapshot_tx, snapshot_rx) = crossbeam_channel::bounded::<P>(SNAPSHOT_QUEUE);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("vocal-session".into())
            .spawn(move || run_session(factory(), command_rx, snapshot_tx, shutdown_rx))?;

        Ok(Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Queues a command. Returns `false` once the worker has exited.
    pub fn send(&self, command: C) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn snapshots(&self) -> &Receiver<P> {
        &self.snapshots
    }

    /// Drains the queue and returns the newest snapshot, if any arrived.
    pub fn latest_snapshot(&self) -> Option<P> {
        self.snapshots.try_iter().last()
    }

    /// Stops the engine and waits for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }
}

impl<C, P> SessionRunner<C, P> {
    fn stop_worker(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.shutdown_tx.try_send(());
            if handle.join().is_err() {
                log::error!(target: "runner", "session thread panicked");
            }
        }
    }
}

impl<C, P> Drop for SessionRunner<C, P> {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn run_session<S: Session>(
    mut engine: S,
    commands: Receiver<S::Command>,
    snapshots: Sender<S::Snapshot>,
    shutdown_rx: Receiver<()>,
) {
    log::debug!(target: "runner", "session thread started");
    let started = Instant::now();
    publish(&snapshots, engine.snapshot());

    loop {
        let wait = engine
            .next_deadline()
            .map(|due| due.saturating_sub(started.elapsed()))
            .unwrap_or(IDLE_WAIT)
            .min(IDLE_WAIT);

        crossbeam_channel::select! {
            recv(commands) -> msg => match msg {
                Ok(command) => {
                    advance(&mut engine, started.elapsed());
                    if let Err(e) = engine.apply(command) {
                        log::warn!(target: "runner", "command rejected: {e}");
                    }
                }
                Err(_) => {
                    log::debug!(target: "runner", "command channel closed");
                    break;
                }
            },
            recv(shutdown_rx) -> _ => {
                log::debug!(target: "runner", "received shutdown signal");
                break;
            },
            default(wait) => advance(&mut engine, started.elapsed()),
        }

        publish(&snapshots, engine.snapshot());
    }

    engine.shutdown();
    publish(&snapshots, engine.snapshot());
    log::debug!(target: "runner", "session thread finished");
}

fn advance<S: Session>(engine: &mut S, now: Duration) {
    if let Err(e) = engine.advance_to(now) {
        log::warn!(target: "runner", "session stopped: {e}");
    }
}

fn publish<P>(snapshots: &Sender<P>, snapshot: P) {
    if snapshots.try_send(snapshot).is_err() {
        log::trace!(target: "runner", "snapshot dropped, observer is behind");
    }
}
