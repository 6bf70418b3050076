//! # Audio Device Module
//!
//! The audio capability the sessions consume: one exclusive microphone input
//! read in fixed-size blocks, plus fire-and-forget tone playback.
//!
//! [`CpalDevice`] implements it on top of CPAL (Cross-Platform Audio Library).
//! Input frames are streamed from the capture callback over a bounded channel.
//! Tones go to a playback thread that owns the output stream and hands them
//! to the output callback, which mixes them.
//!
//! ## Features
//! - Automatic input device selection (mono f32 preferred, otherwise down-mixed)
//! - Latest-block reads of a configurable size, like an analyser node
//! - Output stream built lazily on its own thread, so a stalled output device
//!   never blocks a session longer than the resume timeout

use anyhow::{anyhow, Result as AnyResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::CoachConfig;
use crate::error::{CoachError, Result};
use crate::pitch::BLOCK_SIZE;
use crate::synth::{self, Tone, ToneVoice};

/// Sample rate requested from the input device.
pub const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// Frames queued between the capture callback and the reader.
const FRAME_QUEUE: usize = 8;

/// Requests queued for the playback thread.
const PLAYBACK_QUEUE: usize = 32;

/// How long dropping the device waits for the playback thread to exit.
const PLAYBACK_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Proof of an acquired input stream; must be handed back to release it.
#[derive(Debug, PartialEq, Eq)]
pub struct InputHandle(u64);

impl InputHandle {
    /// Creates a handle; only device implementations should need this.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// One block of mono time-domain samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// The audio capability consumed by the exercise sessions.
pub trait AudioDevice {
    /// Opens the microphone. Fails when permission is denied or no device exists.
    fn acquire_input(&mut self) -> Result<InputHandle>;

    /// Reads the most recent block from an acquired input, if one is available.
    fn read_block(&mut self, input: &InputHandle) -> Option<AudioBlock>;

    /// Closes the input stream.
    fn release_input(&mut self, input: InputHandle);

    /// Schedules a tone. Failures are reported but never fatal to a session.
    fn play_tone(&mut self, tone: Tone) -> AnyResult<()>;

    /// Resumes a suspended output subsystem, blocking for at most `timeout`.
    ///
    /// Returns `false` when the output was not confirmed running in time;
    /// callers proceed either way.
    fn resume(&mut self, timeout: Duration) -> bool;
}

struct Capture {
    id: u64,
    stream: cpal::Stream,
    frames: Receiver<Vec<f32>>,
    latest: Option<Vec<f32>>,
    sample_rate: u32,
}

/// Output stream as seen from the playback thread.
struct Playback {
    stream: cpal::Stream,
    voices: Sender<ToneVoice>,
    sample_rate: u32,
}

enum PlaybackRequest {
    Tone(Tone),
    /// Restart the output; the thread answers on the enclosed channel.
    Resume(Sender<bool>),
}

/// Handle to the thread that owns the output stream.
struct PlaybackWorker {
    requests: Sender<PlaybackRequest>,
    shutdown_tx: Sender<()>,
    // Disconnects when the thread exits.
    exited: Receiver<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        match self.exited.recv_timeout(PLAYBACK_SHUTDOWN_GRACE) {
            Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!(target: "audio", "playback thread panicked");
                }
            }
            _ => {
                // Still stuck in the output driver; leave it detached.
                log::warn!(target: "audio", "playback thread did not exit, detaching");
            }
        }
    }
}

/// Audio device backed by the default CPAL host.
///
/// CPAL streams are not `Send` on every platform, so build this on the thread
/// that will use it (see `SessionRunner::spawn`). The output stream lives on
/// a thread of its own.
pub struct CpalDevice {
    host: cpal::Host,
    preferred_sample_rate: u32,
    block_size: usize,
    capture: Option<Capture>,
    playback: Option<PlaybackWorker>,
    next_id: u64,
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new(PREFERRED_SAMPLE_RATE)
    }
}

impl CpalDevice {
    pub fn new(preferred_sample_rate: u32) -> Self {
        Self {
            host: cpal::default_host(),
            preferred_sample_rate,
            block_size: BLOCK_SIZE,
            capture: None,
            playback: None,
            next_id: 1,
        }
    }

    /// Device that captures at the configured rate in blocks of
    /// `detector.block_size` samples.
    pub fn from_config(config: &CoachConfig) -> Self {
        Self::new(config.audio.preferred_sample_rate).with_block_size(config.detector.block_size)
    }

    /// Sets the number of samples per captured block. Zero is ignored.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        if block_size > 0 {
            self.block_size = block_size;
        }
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn playback(&mut self) -> AnyResult<&PlaybackWorker> {
        if self.playback.is_none() {
            self.playback = Some(spawn_playback()?);
        }
        self.playback
            .as_ref()
            .ok_or_else(|| anyhow!("playback thread unavailable"))
    }

    /// Queues a request, restarting the playback thread once if it has died.
    fn send_playback(&mut self, request: PlaybackRequest) -> AnyResult<()> {
        let request = match self.playback()?.requests.try_send(request) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => return Err(anyhow!("playback queue is full")),
            Err(TrySendError::Disconnected(request)) => request,
        };
        log::info!(target: "audio", "playback thread gone, restarting it");
        self.playback = None;
        self.playback()?
            .requests
            .try_send(request)
            .map_err(|e| anyhow!("playback thread rejected request: {e}"))
    }
}

impl AudioDevice for CpalDevice {
    fn acquire_input(&mut self) -> Result<InputHandle> {
        if self.capture.is_some() {
            return Err(CoachError::InputUnavailable(
                "input stream already acquired".to_string(),
            ));
        }

        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_QUEUE);
        let (stream, sample_rate) = start_audio_capture(
            &self.host,
            frame_tx,
            self.preferred_sample_rate,
            self.block_size,
        )
        .map_err(|e| CoachError::InputUnavailable(e.to_string()))?;

        let id = self.next_id;
        self.next_id += 1;
        self.capture = Some(Capture {
            id,
            stream,
            frames: frame_rx,
            latest: None,
            sample_rate,
        });
        log::info!(target: "audio", "input stream {id} acquired at {sample_rate} Hz");
        Ok(InputHandle::new(id))
    }

    fn read_block(&mut self, input: &InputHandle) -> Option<AudioBlock> {
        let capture = self.capture.as_mut().filter(|c| c.id == input.id())?;
        // Keep only the newest frame, like an analyser's time-domain window.
        while let Ok(frame) = capture.frames.try_recv() {
            capture.latest = Some(frame);
        }
        capture.latest.as_ref().map(|samples| AudioBlock {
            samples: samples.clone(),
            sample_rate: capture.sample_rate,
        })
    }

    fn release_input(&mut self, input: InputHandle) {
        match self.capture.take() {
            Some(capture) if capture.id == input.id() => {
                if let Err(e) = capture.stream.pause() {
                    log::warn!(target: "audio", "error pausing input stream: {e}");
                }
                drop(capture);
                log::info!(target: "audio", "input stream {} released", input.id());
            }
            other => {
                log::warn!(target: "audio", "release of unknown input stream {}", input.id());
                self.capture = other;
            }
        }
    }

    fn play_tone(&mut self, tone: Tone) -> AnyResult<()> {
        self.send_playback(PlaybackRequest::Tone(tone))
    }

    fn resume(&mut self, timeout: Duration) -> bool {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        if let Err(e) = self.send_playback(PlaybackRequest::Resume(reply_tx)) {
            log::warn!(target: "audio", "output resume not requested: {e}");
            return false;
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(resumed) => resumed,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(target: "audio", "output did not resume within {timeout:?}");
                false
            }
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `host` - CPAL host to pick the device from
/// * `sender` - Receives mono frames of exactly `block_size` samples
/// * `target_rate` - Preferred sample rate in Hz
/// * `block_size` - Samples per frame
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Running stream and its sample rate
/// * `Err(e)` - No device, no f32 format, or the stream failed to start
fn start_audio_capture(
    host: &cpal::Host,
    sender: Sender<Vec<f32>>,
    target_rate: u32,
    block_size: usize,
) -> AnyResult<(cpal::Stream, u32)> {
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    log::info!(target: "audio", "using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let channels = config.channels() as usize;
    let sample_rate = config.sample_rate().0;
    let config: cpal::StreamConfig = config.into();

    log::debug!(target: "audio", "capture config: {sample_rate} Hz, {channels} channel(s)");

    let err_fn = |err| log::error!(target: "audio", "input stream error: {err}");

    // Accumulates mono samples until a full block is available.
    let mut audio_buffer = Vec::with_capacity(block_size * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            downmix_into(data, channels, &mut audio_buffer);
            // A full queue means the reader is behind; dropping is fine
            // because only the newest block is ever read.
            drain_blocks(&mut audio_buffer, block_size, |frame| {
                let _ = sender.try_send(frame);
            });
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Starts the thread that owns the output stream.
///
/// The stream is built on the thread, so a slow output driver delays only the
/// requests, never the caller.
fn spawn_playback() -> AnyResult<PlaybackWorker> {
    let (request_tx, request_rx) = crossbeam_channel::bounded::<PlaybackRequest>(PLAYBACK_QUEUE);
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(1);

    let thread_handle = thread::Builder::new()
        .name("vocal-playback".to_string())
        .spawn(move || {
            let _exit = exit_tx;
            let playback = match start_playback(&cpal::default_host()) {
                Ok(playback) => playback,
                Err(e) => {
                    // Dropping the request receiver fails later sends.
                    log::error!(target: "audio", "output stream unavailable: {e}");
                    return;
                }
            };

            loop {
                crossbeam_channel::select! {
                    recv(request_rx) -> request => match request {
                        Ok(request) => handle_playback_request(&playback, request),
                        Err(_) => break,
                    },
                    recv(shutdown_rx) -> _ => break,
                }
            }

            if let Err(e) = playback.stream.pause() {
                log::warn!(target: "audio", "error pausing output stream: {e}");
            }
            log::debug!(target: "audio", "playback thread stopped");
        })?;

    Ok(PlaybackWorker {
        requests: request_tx,
        shutdown_tx,
        exited: exit_rx,
        thread_handle: Some(thread_handle),
    })
}

fn handle_playback_request(playback: &Playback, request: PlaybackRequest) {
    match request {
        PlaybackRequest::Tone(tone) => {
            let voice = ToneVoice::new(tone, playback.sample_rate);
            if let Err(e) = playback.voices.try_send(voice) {
                log::warn!(target: "audio", "tone queue rejected voice: {e}");
            }
        }
        PlaybackRequest::Resume(reply) => {
            let resumed = match playback.stream.play() {
                Ok(()) => true,
                Err(e) => {
                    log::warn!(target: "audio", "output resume failed: {e}");
                    false
                }
            };
            // The caller may have stopped waiting.
            let _ = reply.try_send(resumed);
        }
    }
}

/// Builds and starts the output stream that mixes tone voices.
fn start_playback(host: &cpal::Host) -> AnyResult<Playback> {
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let supported = device.default_output_config()?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(anyhow!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        ));
    }

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();

    let (voice_tx, voice_rx) = crossbeam_channel::bounded::<ToneVoice>(32);
    let mut active: Vec<ToneVoice> = Vec::new();

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            active.extend(voice_rx.try_iter());
            synth::mix_voices(&mut active, data, channels);
        },
        |err| log::error!(target: "audio", "output stream error: {err}"),
        None,
    )?;
    stream.play()?;

    log::info!(target: "audio", "output stream started at {sample_rate} Hz");
    Ok(Playback {
        stream,
        voices: voice_tx,
        sample_rate,
    })
}

/// Moves every complete block at the front of `buffer` to `emit`, keeping
/// the remainder for the next callback.
fn drain_blocks(buffer: &mut Vec<f32>, block_size: usize, mut emit: impl FnMut(Vec<f32>)) {
    if block_size == 0 {
        return;
    }
    while buffer.len() >= block_size {
        emit(buffer.drain(..block_size).collect());
    }
}

/// Appends interleaved samples to `out` as mono, averaging the channels.
pub fn downmix_into(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Only 32-bit float formats are considered. Mono is preferred, then the
/// range whose bounds are closest to the target rate.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let covers = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let rate_distance = if covers { 0 } else { min_diff.min(max_diff) };
            (c.channels() != 1, rate_distance)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_passes_through() {
        let mut out = Vec::new();
        downmix_into(&[0.1, 0.2, 0.3], 1, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut out = vec![9.0];
        downmix_into(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![9.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn capture_frames_follow_the_block_size() {
        let mut buffer: Vec<f32> = (0..1300).map(|i| i as f32).collect();
        let mut frames = Vec::new();
        drain_blocks(&mut buffer, 512, |frame| frames.push(frame));

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 512));
        assert_eq!(frames[0][0], 0.0);
        assert_eq!(frames[1][0], 512.0);
        assert_eq!(buffer.len(), 1300 - 1024);
        assert_eq!(buffer[0], 1024.0);

        // The remainder completes a block with the next callback's samples.
        buffer.extend((0..236).map(|_| 0.0));
        drain_blocks(&mut buffer, 512, |frame| frames.push(frame));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2][0], 1024.0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn short_buffer_emits_nothing() {
        let mut buffer = vec![0.5; 100];
        let mut emitted = 0;
        drain_blocks(&mut buffer, 128, |_| emitted += 1);
        drain_blocks(&mut buffer, 0, |_| emitted += 1);
        assert_eq!(emitted, 0);
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn handles_are_compared_by_id() {
        assert_eq!(InputHandle::new(3).id(), 3);
        assert_ne!(InputHandle::new(3), InputHandle::new(4));
    }
}
