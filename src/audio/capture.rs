//! Microphone capture via `cpal`.
//!
//! [`Microphone::start`] opens the input device and returns a
//! [`CaptureSession`] that yields fixed-length 16 kHz mono [`AudioFrame`]s.
//!
//! ```text
//!  cpal thread                          async side
//!  ───────────                          ──────────
//!  callback ─ downmix ─ resample ─ slice ─► mpsc ─► CaptureSession::next_frame
//!      ▲                                               │
//!      └──────── stream dropped ◄── shutdown ◄── stop()┘
//! ```
//!
//! The stream lives on a dedicated thread because `cpal::Stream` is not
//! `Send` on every platform.  The callback never blocks: when the frame queue
//! is full the frame is dropped and logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::frame::{AudioFrame, FrameSlicer, CAPTURE_SAMPLE_RATE, DEFAULT_FRAME_SAMPLES};
use super::resample::{downmix_to_mono, StreamResampler};
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CaptureError {
    /// Classify a backend message.  cpal reports OS permission refusals as
    /// backend-specific text, so this is a keyword match.
    fn from_backend(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
            CaptureError::PermissionDenied
        } else {
            CaptureError::DeviceUnavailable(message)
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        CaptureError::from_backend(format!("failed to query default input config: {e}"))
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("input device disappeared".to_string())
            }
            other => CaptureError::from_backend(format!("failed to build input stream: {other}")),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(e: cpal::PlayStreamError) -> Self {
        CaptureError::from_backend(format!("failed to start input stream: {e}"))
    }
}

// ---------------------------------------------------------------------------
// CaptureSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Output rate of every frame.
    pub sample_rate: u32,
    /// Samples per frame.
    pub frame_samples: usize,
    /// Frames buffered between the device thread and the consumer.
    pub queue_frames: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            queue_frames: 32,
        }
    }
}

impl From<&AudioConfig> for CaptureSettings {
    fn from(cfg: &AudioConfig) -> Self {
        Self {
            sample_rate: cfg.capture_sample_rate,
            frame_samples: cfg.frame_samples.max(1),
            queue_frames: cfg.capture_queue_frames.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

/// A running capture.  Dropping it stops the device.
pub struct CaptureSession {
    frames: mpsc::Receiver<AudioFrame>,
    active: Arc<AtomicBool>,
    /// Dropping this sender wakes the device thread, which then drops the
    /// stream.
    shutdown: Option<std::sync::mpsc::Sender<()>>,
}

impl CaptureSession {
    pub fn new(
        frames: mpsc::Receiver<AudioFrame>,
        active: Arc<AtomicBool>,
        shutdown: Option<std::sync::mpsc::Sender<()>>,
    ) -> Self {
        Self {
            frames,
            active,
            shutdown,
        }
    }

    /// Next captured frame, or `None` once the capture has stopped or the
    /// device went away.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        if !self.is_active() {
            return None;
        }
        self.frames.recv().await
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Release the device.  Idempotent; no frame is yielded afterwards.
    pub fn stop(&mut self) {
        if self.active.swap(false, Ordering::AcqRel) {
            log::debug!("capture: stopping");
        }
        self.frames.close();
        while self.frames.try_recv().is_ok() {}
        self.shutdown.take();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Source of capture sessions.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Open the input device and begin producing frames.
    ///
    /// # Errors
    ///
    /// [`CaptureError::PermissionDenied`] when the OS refuses access,
    /// [`CaptureError::DeviceUnavailable`] for anything else.  No retry.
    async fn start(&self, settings: &CaptureSettings) -> Result<CaptureSession, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// The system default input device.
///
/// # Example
///
/// ```rust,no_run
/// use voice_agent::audio::{CaptureSettings, CpalMicrophone, Microphone};
///
/// # async fn demo() {
/// let mut session = CpalMicrophone.start(&CaptureSettings::default()).await.unwrap();
/// while let Some(frame) = session.next_frame().await {
///     println!("{} samples @ {} Hz", frame.len(), frame.sample_rate());
/// }
/// # }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn start(&self, settings: &CaptureSettings) -> Result<CaptureSession, CaptureError> {
        let (frame_tx, frame_rx) = mpsc::channel(settings.queue_frames.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let active = Arc::new(AtomicBool::new(true));

        let thread_settings = settings.clone();
        let thread_active = Arc::clone(&active);

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&thread_settings, frame_tx, thread_active) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    log::debug!("capture: start abandoned, releasing device");
                    return;
                }
                // Blocks until the session drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("capture: device released");
            })
            .map_err(|e| CaptureError::DeviceUnavailable(format!("cannot spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                log::info!(
                    "capture: microphone open ({} Hz mono, {} samples/frame)",
                    settings.sample_rate,
                    settings.frame_samples
                );
                Ok(CaptureSession::new(frame_rx, active, Some(shutdown_tx)))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::DeviceUnavailable(
                "capture thread exited before the device opened".to_string(),
            )),
        }
    }
}

fn open_input_stream(
    settings: &CaptureSettings,
    tx: mpsc::Sender<AudioFrame>,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no input device found".to_string()))?;

    let supported = device.default_input_config()?;
    let channels = supported.channels();
    let device_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let target_rate = settings.sample_rate;
    let mut resampler = StreamResampler::new(device_rate, target_rate);
    let mut slicer = FrameSlicer::new(settings.frame_samples.max(1), target_rate);
    let mut dropped: u64 = 0;

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !active.load(Ordering::Acquire) {
                return;
            }
            let mono = downmix_to_mono(data, channels);
            let resampled = resampler.process(&mono);
            for frame in slicer.push(&resampled) {
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        log::warn!("capture: frame queue full, dropped {dropped} frame(s) so far");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal input stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    log::debug!("capture: device at {device_rate} Hz, {channels} channel(s)");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// MockMicrophone (test double)
// ---------------------------------------------------------------------------

/// Scripted microphone for tests.
///
/// Every started session is recorded; tests feed frames through
/// [`feeder`](Self::feeder) and check [`running_count`](Self::running_count).
#[cfg(test)]
pub struct MockMicrophone {
    failure: Option<CaptureError>,
    delay: std::time::Duration,
    starts: std::sync::atomic::AtomicUsize,
    sessions: std::sync::Mutex<Vec<(Option<mpsc::Sender<AudioFrame>>, Arc<AtomicBool>)>>,
}

#[cfg(test)]
impl MockMicrophone {
    pub fn new() -> Self {
        Self {
            failure: None,
            delay: std::time::Duration::ZERO,
            starts: Default::default(),
            sessions: Default::default(),
        }
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Sessions that have not been stopped.
    pub fn running_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, active)| active.load(Ordering::SeqCst))
            .count()
    }

    pub fn feeder(&self, index: usize) -> Option<mpsc::Sender<AudioFrame>> {
        self.sessions.lock().unwrap().get(index).and_then(|(tx, _)| tx.clone())
    }

    /// Drop the mock's own sender for session `index`, as if the device
    /// vanished.  The frame stream ends once every feeder is gone too.
    pub fn disconnect(&self, index: usize) {
        if let Some((tx, _)) = self.sessions.lock().unwrap().get_mut(index) {
            tx.take();
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Microphone for MockMicrophone {
    async fn start(&self, settings: &CaptureSettings) -> Result<CaptureSession, CaptureError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        let (tx, rx) = mpsc::channel(settings.queue_frames.max(1));
        let active = Arc::new(AtomicBool::new(true));
        self.sessions.lock().unwrap().push((Some(tx), Arc::clone(&active)));
        Ok(CaptureSession::new(rx, active, None))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f32) -> AudioFrame {
        AudioFrame::from_f32(&[value; 8], CAPTURE_SAMPLE_RATE)
    }

    #[test]
    fn frame_and_session_types_cross_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioFrame>();
        assert_send::<CaptureSession>();
    }

    #[test]
    fn backend_text_is_classified() {
        assert_eq!(
            CaptureError::from_backend("Permission denied (os error 13)".into()),
            CaptureError::PermissionDenied
        );
        assert!(matches!(
            CaptureError::from_backend("ALSA function 'snd_pcm_open' failed".into()),
            CaptureError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn settings_follow_audio_config() {
        let cfg = AudioConfig {
            frame_samples: 2_048,
            capture_queue_frames: 0,
            ..AudioConfig::default()
        };
        let settings = CaptureSettings::from(&cfg);
        assert_eq!(settings.sample_rate, 16_000);
        assert_eq!(settings.frame_samples, 2_048);
        assert_eq!(settings.queue_frames, 1);
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let mic = MockMicrophone::new();
        let mut session = mic.start(&CaptureSettings::default()).await.unwrap();
        let feeder = mic.feeder(0).unwrap();

        feeder.send(frame(0.1)).await.unwrap();
        feeder.send(frame(0.2)).await.unwrap();

        assert_eq!(session.next_frame().await, Some(frame(0.1)));
        assert_eq!(session.next_frame().await, Some(frame(0.2)));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_silences_the_session() {
        let mic = MockMicrophone::new();
        let mut session = mic.start(&CaptureSettings::default()).await.unwrap();
        let feeder = mic.feeder(0).unwrap();
        feeder.send(frame(0.3)).await.unwrap();

        session.stop();
        session.stop();

        assert!(!session.is_active());
        assert_eq!(mic.running_count(), 0);
        assert_eq!(session.next_frame().await, None);
        assert!(feeder.send(frame(0.4)).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_session_stops_it() {
        let mic = MockMicrophone::new();
        let session = mic.start(&CaptureSettings::default()).await.unwrap();
        assert_eq!(mic.running_count(), 1);
        drop(session);
        assert_eq!(mic.running_count(), 0);
    }

    #[tokio::test]
    async fn failing_microphone_reports_its_error() {
        let mic = MockMicrophone::failing(CaptureError::PermissionDenied);
        let err = mic.start(&CaptureSettings::default()).await.err().unwrap();
        assert_eq!(err, CaptureError::PermissionDenied);
        assert_eq!(mic.start_count(), 1);
        assert_eq!(mic.running_count(), 0);
    }
}
