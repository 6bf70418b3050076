mod common;

use std::time::{Duration, Instant};

use common::{init_logging, FakeDevice};
use vocal_core::config::CoachConfig;
use vocal_core::persistence::MemoryStore;
use vocal_core::range_finder::{RangeFinder, RangeSnapshot, RangeStatus};
use vocal_core::runtime::{RangeCommand, SessionRunner, TrainerCommand};
use vocal_core::sequence::Sequence;
use vocal_core::trainer::{Trainer, TrainerPhase, TrainerSnapshot};

const PATIENCE: Duration = Duration::from_secs(5);

fn fast_config() -> CoachConfig {
    let mut config = CoachConfig::default();
    config.trainer.lead_in_ms = 10;
    config.trainer.tone_spacing_ms = 20;
    config.trainer.silence_wait_ms = 20;
    config.trainer.warmup_ms = 10;
    config.trainer.tick_ms = 5;
    config.trainer.success_pause_ms = 10;
    config.range_finder.tick_ms = 5;
    config
}

/// Receives snapshots until one satisfies `done`.
fn wait_for<C, P>(runner: &SessionRunner<C, P>, done: impl Fn(&P) -> bool) -> Option<P>
where
    C: Send + 'static,
    P: Send + 'static,
{
    let deadline = Instant::now() + PATIENCE;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match runner.snapshots().recv_timeout(left) {
            Ok(snapshot) if done(&snapshot) => return Some(snapshot),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn trainer_round_runs_on_the_worker_thread() {
    init_logging();
    let device = FakeDevice::new();
    device.sing_midi(57);

    let engine_device = device.clone();
    let runner: SessionRunner<TrainerCommand, TrainerSnapshot> = SessionRunner::spawn(move || {
        Trainer::with_seed(&fast_config(), engine_device, MemoryStore::new(), 3)
    })
    .unwrap();

    assert!(runner.send(TrainerCommand::StartWith(Sequence::from(vec![57, 57]))));

    let snapshot = wait_for(&runner, |s| s.phase == TrainerPhase::Feedback)
        .expect("round did not finish");
    assert!(snapshot.results.iter().all(|r| r.success));
    assert_eq!(snapshot.best_streak, 1);
    assert!(!device.is_acquired());
    assert_eq!(device.tones().len(), 4);

    runner.shutdown();
}

#[test]
fn range_finder_reports_through_snapshots() {
    init_logging();
    let device = FakeDevice::new();
    device.sing_midi(52);

    let engine_device = device.clone();
    let runner: SessionRunner<RangeCommand, RangeSnapshot> = SessionRunner::spawn(move || {
        RangeFinder::new(&fast_config(), engine_device, MemoryStore::new())
    })
    .unwrap();

    runner.send(RangeCommand::Start);
    let snapshot = wait_for(&runner, |s| s.record_low.is_some()).expect("no low record");
    assert_eq!(snapshot.status, RangeStatus::Testing);
    assert_eq!(snapshot.record_low.map(|n| n.midi), Some(52));
    assert!(device.is_acquired());

    device.sing_midi(64);
    runner.send(RangeCommand::Confirm);
    let snapshot = wait_for(&runner, |s| s.record_high.is_some()).expect("no high record");
    assert_eq!(snapshot.record_high.map(|n| n.midi), Some(64));

    runner.send(RangeCommand::Confirm);
    let snapshot = wait_for(&runner, |s| s.status == RangeStatus::Done).expect("not finished");
    let range = snapshot.result.unwrap();
    assert_eq!((range.low_midi, range.high_midi), (52, 64));
    assert!(!device.is_acquired());
}

#[test]
fn dropping_the_runner_releases_the_microphone() {
    init_logging();
    let device = FakeDevice::new();

    let engine_device = device.clone();
    let runner: SessionRunner<RangeCommand, RangeSnapshot> = SessionRunner::spawn(move || {
        RangeFinder::new(&fast_config(), engine_device, MemoryStore::new())
    })
    .unwrap();

    runner.send(RangeCommand::Start);
    wait_for(&runner, |s| s.status == RangeStatus::Testing).expect("never started");
    assert!(device.is_acquired());

    drop(runner);
    assert!(!device.is_acquired());
}

#[test]
fn rejected_commands_keep_the_worker_alive() {
    init_logging();
    let device = FakeDevice::new();
    let runner: SessionRunner<TrainerCommand, TrainerSnapshot> = SessionRunner::spawn(move || {
        Trainer::with_seed(&fast_config(), device, MemoryStore::new(), 3)
    })
    .unwrap();

    assert!(runner.send(TrainerCommand::Replay));
    assert!(runner.send(TrainerCommand::SetLevel(4)));
    let snapshot = wait_for(&runner, |s| s.level == 4).expect("level not applied");
    assert_eq!(snapshot.phase, TrainerPhase::Setup);
}
