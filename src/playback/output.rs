//! Audio output device seam and the cpal-backed implementation.
//!
//! An [`AudioOutput`] owns a monotonic clock (seconds since it opened) and
//! plays [`ScheduledPlayback`]s at absolute times on that clock.  It also
//! exposes an analysis tap: a ring of the most recently rendered mono samples,
//! read by the activity meter.
//!
//! ```text
//!  PlaybackScheduler ── play(start_at) ──► Mixer ◄── cpal output callback
//!                                           │            │
//!                 completion hooks ◄────────┘            ├─► device
//!                                                        └─► analysis tap
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::audio::resample::resample_linear;
use crate::audio::{AudioBuffer, RingBuffer};
use crate::config::MeterConfig;

pub type PlaybackId = u64;

/// Called once when a playback finishes or is stopped.
pub type CompletionHook = Box<dyn FnOnce(PlaybackId) + Send>;

/// Most recent rendered output, shared with the activity meter.
pub type AnalysisTap = Arc<Mutex<RingBuffer<f32>>>;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio output is closed")]
    Closed,
}

impl From<cpal::DefaultStreamConfigError> for PlaybackError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        PlaybackError::DeviceUnavailable(format!("failed to query default output config: {e}"))
    }
}

impl From<cpal::BuildStreamError> for PlaybackError {
    fn from(e: cpal::BuildStreamError) -> Self {
        PlaybackError::DeviceUnavailable(format!("failed to build output stream: {e}"))
    }
}

impl From<cpal::PlayStreamError> for PlaybackError {
    fn from(e: cpal::PlayStreamError) -> Self {
        PlaybackError::DeviceUnavailable(format!("failed to start output stream: {e}"))
    }
}

// ---------------------------------------------------------------------------
// ScheduledPlayback
// ---------------------------------------------------------------------------

/// A decoded buffer bound to a start time on the output clock.
pub struct ScheduledPlayback {
    id: PlaybackId,
    buffer: AudioBuffer,
    start_at: f64,
    on_complete: Option<CompletionHook>,
}

impl ScheduledPlayback {
    pub fn new(id: PlaybackId, buffer: AudioBuffer, start_at: f64, on_complete: CompletionHook) -> Self {
        Self {
            id,
            buffer,
            start_at,
            on_complete: Some(on_complete),
        }
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn start_at(&self) -> f64 {
        self.start_at
    }

    pub fn end_at(&self) -> f64 {
        self.start_at + self.buffer.duration_secs()
    }

    /// Fire the completion hook.
    pub fn complete(mut self) {
        if let Some(hook) = self.on_complete.take() {
            hook(self.id);
        }
    }
}

impl std::fmt::Debug for ScheduledPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledPlayback")
            .field("id", &self.id)
            .field("start_at", &self.start_at)
            .field("duration", &self.buffer.duration_secs())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AudioOutput / Speaker
// ---------------------------------------------------------------------------

/// An open output device.
pub trait AudioOutput: Send + Sync {
    /// Seconds elapsed on the output clock.
    fn now(&self) -> f64;

    /// Schedule `playback`.  A start time already in the past plays
    /// immediately.
    fn play(&self, playback: ScheduledPlayback) -> Result<(), PlaybackError>;

    /// Stop one playback and fire its hook.  Unknown or finished ids are
    /// ignored.
    fn stop(&self, id: PlaybackId);

    fn tap(&self) -> AnalysisTap;

    /// Release the device.  Pending playbacks are stopped.  Idempotent.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    /// Capacity of the analysis ring, in samples.
    pub analysis_window: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            analysis_window: 2_048,
        }
    }
}

impl From<&MeterConfig> for PlaybackSettings {
    fn from(cfg: &MeterConfig) -> Self {
        Self {
            analysis_window: (cfg.fft_size * 4).max(PlaybackSettings::default().analysis_window),
        }
    }
}

/// Opens output devices.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn open(&self, settings: &PlaybackSettings) -> Result<Arc<dyn AudioOutput>, PlaybackError>;
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Voice {
    playback: ScheduledPlayback,
    /// Samples at the device rate.
    samples: Vec<f32>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums every scheduled voice into the device buffer.
///
/// Voices are placed on an absolute frame timeline that starts at zero when
/// the output opens, so consecutive buffers scheduled back to back render
/// with no gap between them.
struct Mixer {
    device_rate: u32,
    voices: Vec<Voice>,
    frames_rendered: u64,
    mix: Vec<f32>,
    closed: bool,
}

impl Mixer {
    fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            voices: Vec::new(),
            frames_rendered: 0,
            mix: Vec::new(),
            closed: false,
        }
    }

    fn add(&mut self, playback: ScheduledPlayback) -> Result<(), ScheduledPlayback> {
        if self.closed {
            return Err(playback);
        }
        let rate = self.device_rate as f64;
        let requested = (playback.start_at() * rate).round() as u64;
        // Length comes from the rounded end time, not the resampled length,
        // so a voice ends exactly where the next back-to-back voice starts.
        let end = (playback.end_at() * rate).round() as u64;
        let frames = end.saturating_sub(requested) as usize;

        let mut samples = resample_linear(
            playback.buffer().samples(),
            playback.buffer().sample_rate(),
            self.device_rate,
        );
        let pad = samples.last().copied().unwrap_or(0.0);
        samples.resize(frames, pad);

        self.voices.push(Voice {
            playback,
            samples,
            start_frame: requested.max(self.frames_rendered),
        });
        Ok(())
    }

    fn remove(&mut self, id: PlaybackId) -> Option<ScheduledPlayback> {
        let idx = self.voices.iter().position(|v| v.playback.id() == id)?;
        Some(self.voices.swap_remove(idx).playback)
    }

    fn close(&mut self) -> Vec<ScheduledPlayback> {
        self.closed = true;
        self.voices.drain(..).map(|v| v.playback).collect()
    }

    /// Render one interleaved block and return the playbacks that finished
    /// inside it.  Their hooks must be fired by the caller once the mixer
    /// lock is released.
    fn render(&mut self, out: &mut [f32], channels: u16) -> Vec<ScheduledPlayback> {
        let channels = channels.max(1) as usize;
        let frames = out.len() / channels;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames as u64;

        self.mix.clear();
        self.mix.resize(frames, 0.0);

        for voice in &self.voices {
            let from = block_start.max(voice.start_frame);
            let to = block_end.min(voice.end_frame());
            for f in from..to {
                self.mix[(f - block_start) as usize] += voice.samples[(f - voice.start_frame) as usize];
            }
        }

        for (frame, &sample) in out.chunks_mut(channels).zip(self.mix.iter()) {
            frame.fill(sample.clamp(-1.0, 1.0));
        }
        self.frames_rendered = block_end;

        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].end_frame() <= block_end {
                finished.push(self.voices.swap_remove(i).playback);
            } else {
                i += 1;
            }
        }
        finished
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> std::sync::MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// CpalOutput / CpalSpeaker
// ---------------------------------------------------------------------------

/// The system default output device.
///
/// The cpal stream is owned by a dedicated thread that parks until
/// [`close`](AudioOutput::close) drops the shutdown sender.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    device_rate: u32,
    tap: AnalysisTap,
    closed: AtomicBool,
    shutdown: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl CpalOutput {
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn play(&self, playback: ScheduledPlayback) -> Result<(), PlaybackError> {
        let rejected = lock_mixer(&self.mixer).add(playback);
        match rejected {
            Ok(()) => Ok(()),
            Err(playback) => {
                playback.complete();
                Err(PlaybackError::Closed)
            }
        }
    }

    fn stop(&self, id: PlaybackId) {
        let stopped = lock_mixer(&self.mixer).remove(id);
        if let Some(playback) = stopped {
            playback.complete();
        }
    }

    fn tap(&self) -> AnalysisTap {
        Arc::clone(&self.tap)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = lock_mixer(&self.mixer).close();
        for playback in pending {
            playback.complete();
        }
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        log::debug!("output: closed");
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSpeaker;

#[async_trait]
impl Speaker for CpalSpeaker {
    /// Opens the default output device.  The stream is built on its own
    /// thread; this resolves once it is playing.
    async fn open(&self, settings: &PlaybackSettings) -> Result<Arc<dyn AudioOutput>, PlaybackError> {
        let tap: AnalysisTap = Arc::new(Mutex::new(RingBuffer::new(settings.analysis_window.max(1))));
        let clock = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(u32, Arc<Mutex<Mixer>>), PlaybackError>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_tap = Arc::clone(&tap);
        let thread_clock = Arc::clone(&clock);

        std::thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || {
                let (stream, rate, mixer) = match open_output_stream(thread_tap, thread_clock) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok((rate, mixer))).is_err() {
                    log::debug!("output: open abandoned, releasing device");
                    return;
                }
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("output: device released");
            })
            .map_err(|e| PlaybackError::DeviceUnavailable(format!("cannot spawn output thread: {e}")))?;

        let (device_rate, mixer) = ready_rx
            .await
            .map_err(|_| PlaybackError::DeviceUnavailable("output thread exited early".to_string()))??;

        log::info!("output: speaker open at {device_rate} Hz");
        Ok(Arc::new(CpalOutput {
            mixer,
            clock,
            device_rate,
            tap,
            closed: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
        }))
    }
}

type OpenedStream = (cpal::Stream, u32, Arc<Mutex<Mixer>>);

fn open_output_stream(tap: AnalysisTap, clock: Arc<AtomicU64>) -> Result<OpenedStream, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::DeviceUnavailable("no output device found".to_string()))?;

    let supported = device.default_output_config()?;
    let channels = supported.channels();
    let device_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let mixer = Arc::new(Mutex::new(Mixer::new(device_rate)));
    let callback_mixer = Arc::clone(&mixer);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let finished = {
                let mut mixer = lock_mixer(&callback_mixer);
                let finished = mixer.render(data, channels);
                clock.store(mixer.frames_rendered, Ordering::Release);
                // Skip the tap rather than stall the device when the meter
                // holds the lock.
                if let Ok(mut ring) = tap.try_lock() {
                    ring.push_slice(&mixer.mix);
                }
                finished
            };
            for playback in finished {
                playback.complete();
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal output stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, device_rate, mixer))
}

// ---------------------------------------------------------------------------
// MockOutput (test double)
// ---------------------------------------------------------------------------

/// Output with a manually driven clock.
///
/// Playbacks stay "playing" until [`advance_to`](Self::advance_to) passes
/// their end time or they are stopped.
#[cfg(test)]
pub struct MockOutput {
    now: Mutex<f64>,
    playing: Mutex<Vec<ScheduledPlayback>>,
    starts: Mutex<Vec<f64>>,
    stopped: Mutex<Vec<PlaybackId>>,
    closed: AtomicBool,
    close_calls: std::sync::atomic::AtomicUsize,
    tap: AnalysisTap,
}

#[cfg(test)]
impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(0.0),
            playing: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: Default::default(),
            tap: Arc::new(Mutex::new(RingBuffer::new(1_024))),
        })
    }

    pub fn set_now(&self, now: f64) {
        *self.now.lock().unwrap() = now;
    }

    /// Move the clock and complete every playback that ends by `now`.
    pub fn advance_to(&self, now: f64) {
        self.set_now(now);
        let finished: Vec<ScheduledPlayback> = {
            let mut playing = self.playing.lock().unwrap();
            let (done, rest): (Vec<_>, Vec<_>) = playing.drain(..).partition(|p| p.end_at() <= now);
            *playing = rest;
            done
        };
        for playback in finished {
            playback.complete();
        }
    }

    /// Start time of every accepted playback, in submission order.
    pub fn start_times(&self) -> Vec<f64> {
        self.starts.lock().unwrap().clone()
    }

    pub fn playing_count(&self) -> usize {
        self.playing.lock().unwrap().len()
    }

    pub fn stopped_ids(&self) -> Vec<PlaybackId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl AudioOutput for MockOutput {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    fn play(&self, playback: ScheduledPlayback) -> Result<(), PlaybackError> {
        if self.is_closed() {
            return Err(PlaybackError::Closed);
        }
        self.starts.lock().unwrap().push(playback.start_at());
        self.playing.lock().unwrap().push(playback);
        Ok(())
    }

    fn stop(&self, id: PlaybackId) {
        let stopped = {
            let mut playing = self.playing.lock().unwrap();
            playing
                .iter()
                .position(|p| p.id() == id)
                .map(|idx| playing.remove(idx))
        };
        if let Some(playback) = stopped {
            self.stopped.lock().unwrap().push(id);
            playback.complete();
        }
    }

    fn tap(&self) -> AnalysisTap {
        Arc::clone(&self.tap)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self.playing.lock().unwrap().drain(..).collect();
        for playback in pending {
            playback.complete();
        }
    }
}

/// Hands out one shared [`MockOutput`], reopening it on every `open`.
#[cfg(test)]
pub struct MockSpeaker {
    output: Arc<MockOutput>,
    fail: bool,
    opens: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockSpeaker {
    pub fn new(output: Arc<MockOutput>) -> Self {
        Self {
            output,
            fail: false,
            opens: Default::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(MockOutput::new())
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Speaker for MockSpeaker {
    async fn open(&self, _settings: &PlaybackSettings) -> Result<Arc<dyn AudioOutput>, PlaybackError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PlaybackError::DeviceUnavailable("no output device found".to_string()));
        }
        self.output.reopen();
        Ok(self.output.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_hook(counter: &Arc<AtomicUsize>) -> CompletionHook {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn playback(id: PlaybackId, samples: Vec<f32>, rate: u32, start_at: f64, counter: &Arc<AtomicUsize>) -> ScheduledPlayback {
        ScheduledPlayback::new(id, AudioBuffer::new(samples, rate), start_at, counting_hook(counter))
    }

    #[test]
    fn back_to_back_voices_render_without_gap() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(10);
        // 4 frames at t=0, 4 frames at t=0.4 (frame 4).
        mixer.add(playback(1, vec![0.25; 4], 10, 0.0, &done)).unwrap();
        mixer.add(playback(2, vec![0.5; 4], 10, 0.4, &done)).unwrap();

        let mut out = vec![9.0; 10];
        let finished = mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(finished.len(), 2);
        assert_eq!(mixer.frames_rendered, 10);
    }

    #[test]
    fn fractional_chunks_abut_exactly_on_the_device_timeline() {
        // 1001 samples at 24 kHz is 1839.34 frames at 44.1 kHz.
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(44_100);
        let first = AudioBuffer::new(vec![0.5; 1_001], 24_000);
        let second_start = first.duration_secs();
        mixer.add(ScheduledPlayback::new(1, first, 0.0, counting_hook(&done))).unwrap();
        mixer.add(playback(2, vec![0.5; 1_001], 24_000, second_start, &done)).unwrap();

        assert_eq!(mixer.voices[0].end_frame(), mixer.voices[1].start_frame);
        let end = mixer.voices[1].end_frame() as usize;

        let mut out = vec![0.0; 4_000];
        mixer.render(&mut out, 1);
        for (i, &s) in out[..end].iter().enumerate() {
            assert!((s - 0.5).abs() < 1e-5, "frame {i}: {s}");
        }
        assert!(out[end..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn overlapping_voices_are_summed_and_duplicated_across_channels() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(10);
        mixer.add(playback(1, vec![0.25; 2], 10, 0.0, &done)).unwrap();
        mixer.add(playback(2, vec![0.25; 2], 10, 0.0, &done)).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn late_start_plays_immediately() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(10);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out, 1);

        mixer.add(playback(1, vec![0.5; 2], 10, 0.0, &done)).unwrap();
        let mut out = vec![0.0; 3];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn voices_spanning_blocks_finish_in_the_last_block() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(10);
        mixer.add(playback(1, vec![0.1; 6], 10, 0.0, &done)).unwrap();

        let mut out = vec![0.0; 4];
        assert!(mixer.render(&mut out, 1).is_empty());
        let finished = mixer.render(&mut out, 1);
        assert_eq!(finished.len(), 1);
        assert_eq!(out, vec![0.1, 0.1, 0.0, 0.0]);
    }

    #[test]
    fn buffers_are_resampled_to_the_device_rate() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(20);
        mixer.add(playback(1, vec![0.5; 4], 10, 0.0, &done)).unwrap();
        assert_eq!(mixer.voices[0].samples.len(), 8);
    }

    #[test]
    fn closed_mixer_rejects_and_returns_pending() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::new(10);
        mixer.add(playback(1, vec![0.5; 4], 10, 0.0, &done)).unwrap();

        let pending = mixer.close();
        assert_eq!(pending.len(), 1);
        assert!(mixer.add(playback(2, vec![0.5; 4], 10, 0.0, &done)).is_err());
    }

    #[test]
    fn completion_hook_fires_exactly_once() {
        let done = Arc::new(AtomicUsize::new(0));
        playback(7, vec![0.0; 1], 10, 0.0, &done).complete();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mock_output_stop_of_unknown_id_is_ignored() {
        let output = MockOutput::new();
        output.stop(42);
        assert!(output.stopped_ids().is_empty());
    }

    #[test]
    fn mock_output_completes_on_advance() {
        let done = Arc::new(AtomicUsize::new(0));
        let output = MockOutput::new();
        output.play(playback(1, vec![0.0; 10], 10, 0.0, &done)).unwrap();
        output.advance_to(0.5);
        assert_eq!(output.playing_count(), 1);
        output.advance_to(1.0);
        assert_eq!(output.playing_count(), 0);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn analysis_window_tracks_fft_size() {
        let cfg = MeterConfig {
            fft_size: 1_024,
            ..MeterConfig::default()
        };
        assert_eq!(PlaybackSettings::from(&cfg).analysis_window, 4_096);
        assert_eq!(PlaybackSettings::from(&MeterConfig::default()).analysis_window, 2_048);
    }
}
