//! Session orchestrator: owns every resource of a voice session.
//!
//! [`SessionOrchestrator::run`] is a single task multiplexing four sources
//! with `tokio::select!`:
//!
//! ```text
//!  SessionCommand (mpsc) ──┐
//!  connect outcome ────────┤
//!  CaptureSession frames ──┼──► one handler at a time ──► SharedStatus
//!  RemoteSession events ───┘
//!
//!  start:   Connecting ─► open speaker ─► join!(connect, mic.start) ─► meter ─► Live
//!  frame:   RemoteSession::send (drop + log on failure)
//!  audio:   decode_chunk ─► PlaybackScheduler::enqueue
//!  barge-in: Interrupted ─► PlaybackScheduler::flush
//!  stop:    Closing ─► capture.stop, remote.close, scheduler.reset,
//!           output.close, meter.stop ─► Idle
//! ```
//!
//! Because only this task touches session state, inbound events are handled
//! strictly in arrival order and outbound frames leave in capture order.

use std::future::pending;
use std::sync::{Arc, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::handle::SessionCommand;
use super::state::{SessionState, SessionStatus, SharedStatus};
use crate::audio::{decode_chunk, AudioFrame, CaptureError, CaptureSession, CaptureSettings, Microphone};
use crate::config::{AppConfig, SessionConfig};
use crate::meter::{ActivityLevel, ActivityMeter};
use crate::playback::{AudioOutput, PlaybackError, PlaybackScheduler, PlaybackSettings, Speaker};
use crate::remote::{InboundEvent, RemoteError, RemoteSession, Transport};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Why a session ended in `Failed`.  The display text is shown to the user.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("microphone stopped unexpectedly")]
    CaptureEnded,
}

/// Everything a successful start attempt opened.
struct Established {
    remote: RemoteSession,
    capture: CaptureSession,
    output: Arc<dyn AudioOutput>,
}

impl Established {
    fn release(mut self) {
        self.capture.stop();
        self.remote.close();
        self.output.close();
    }
}

struct ConnectOutcome {
    attempt: u64,
    result: Result<Established, SessionError>,
}

// ---------------------------------------------------------------------------
// SessionOrchestrator
// ---------------------------------------------------------------------------

/// Drives one voice session at a time.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use voice_agent::audio::CpalMicrophone;
/// use voice_agent::config::AppConfig;
/// use voice_agent::meter::ActivityLevel;
/// use voice_agent::playback::CpalSpeaker;
/// use voice_agent::remote::GeminiTransport;
/// use voice_agent::session::{new_shared_status, SessionHandle, SessionOrchestrator};
///
/// # async fn demo() {
/// let config = AppConfig::default();
/// let status = new_shared_status();
/// let level = ActivityLevel::new();
/// let (tx, rx) = mpsc::channel(16);
///
/// let orchestrator = SessionOrchestrator::new(
///     config.clone(),
///     status.clone(),
///     level.clone(),
///     Arc::new(GeminiTransport::new(&config.audio)),
///     Arc::new(CpalMicrophone),
///     Arc::new(CpalSpeaker),
/// );
/// tokio::spawn(orchestrator.run(rx));
///
/// let handle = SessionHandle::new(tx, status, level);
/// handle.start();
/// # }
/// ```
pub struct SessionOrchestrator {
    config: AppConfig,
    status: SharedStatus,
    level: ActivityLevel,

    transport: Arc<dyn Transport>,
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,

    state: SessionState,
    attempt: u64,
    outcome_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ConnectOutcome>,

    connecting: Option<JoinHandle<()>>,
    remote: Option<RemoteSession>,
    capture: Option<CaptureSession>,
    output: Option<Arc<dyn AudioOutput>>,
    scheduler: Option<PlaybackScheduler>,
    meter: Option<ActivityMeter>,
    frames_sent: u64,
}

impl SessionOrchestrator {
    pub fn new(
        config: AppConfig,
        status: SharedStatus,
        level: ActivityLevel,
        transport: Arc<dyn Transport>,
        microphone: Arc<dyn Microphone>,
        speaker: Arc<dyn Speaker>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            config,
            status,
            level,
            transport,
            microphone,
            speaker,
            state: SessionState::Idle,
            attempt: 0,
            outcome_tx,
            outcome_rx,
            connecting: None,
            remote: None,
            capture: None,
            output: None,
            scheduler: None,
            meter: None,
            frames_sent: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run until the command channel closes, then tear down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(outcome) = self.outcome_rx.recv() => self.handle_connect_outcome(outcome),
                frame = next_frame(&mut self.capture) => self.handle_frame(frame),
                event = next_event(&mut self.remote) => self.handle_event(event),
            }
        }

        if self.state != SessionState::Idle {
            self.stop_session();
        }
        log::info!("session: command channel closed, orchestrator shutting down");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, command: SessionCommand) {
        log::debug!("session: {command:?} in {:?}", self.state);
        match command {
            SessionCommand::Start => self.start_session(),
            SessionCommand::Stop => self.stop_session(),
            SessionCommand::Toggle if self.state == SessionState::Idle => self.start_session(),
            SessionCommand::Toggle => self.stop_session(),
        }
    }

    fn start_session(&mut self) {
        if self.state != SessionState::Idle {
            log::debug!("session: start ignored, already {:?}", self.state);
            return;
        }

        {
            let mut st = self.lock_status();
            st.last_error = None;
            st.turns_completed = 0;
            st.chunks_played = 0;
        }
        self.set_state(SessionState::Connecting);

        self.attempt += 1;
        let attempt = self.attempt;
        let transport = Arc::clone(&self.transport);
        let microphone = Arc::clone(&self.microphone);
        let speaker = Arc::clone(&self.speaker);
        let settings = StartSettings {
            session: self.config.session.clone(),
            capture: CaptureSettings::from(&self.config.audio),
            playback: PlaybackSettings::from(&self.config.meter),
        };
        let outcome_tx = self.outcome_tx.clone();

        log::info!("session: connecting (attempt #{attempt})");
        self.connecting = Some(tokio::spawn(async move {
            let result = establish(transport.as_ref(), microphone.as_ref(), speaker.as_ref(), &settings).await;
            let _ = outcome_tx.send(ConnectOutcome { attempt, result });
        }));
    }

    fn stop_session(&mut self) {
        if self.state == SessionState::Idle {
            log::debug!("session: stop ignored, already idle");
            return;
        }
        self.set_state(SessionState::Closing);
        self.teardown();
        self.set_state(SessionState::Idle);
        log::info!("session: stopped");
    }

    // -----------------------------------------------------------------------
    // Connect outcome
    // -----------------------------------------------------------------------

    fn handle_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let ConnectOutcome { attempt, result } = outcome;

        if attempt != self.attempt || self.state != SessionState::Connecting {
            log::info!("session: discarding stale connect attempt #{attempt}");
            if let Ok(established) = result {
                established.release();
            }
            return;
        }
        self.connecting = None;

        match result {
            Ok(Established { remote, capture, output }) => {
                self.meter = Some(ActivityMeter::spawn(output.tap(), self.level.clone(), &self.config.meter));
                self.scheduler = Some(PlaybackScheduler::new(Arc::clone(&output)));
                self.output = Some(output);
                self.remote = Some(remote);
                self.capture = Some(capture);
                self.frames_sent = 0;
                self.set_state(SessionState::Live);
                log::info!("session: live");
            }
            Err(e) => self.fail(e),
        }
    }

    // -----------------------------------------------------------------------
    // Capture frames
    // -----------------------------------------------------------------------

    fn handle_frame(&mut self, frame: Option<AudioFrame>) {
        let Some(frame) = frame else {
            if self.state == SessionState::Live {
                self.fail(SessionError::CaptureEnded);
            } else {
                self.capture = None;
            }
            return;
        };

        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        match remote.send(frame) {
            Ok(()) => {
                self.frames_sent += 1;
                if self.frames_sent % 100 == 0 {
                    log::debug!("session: {} frames forwarded", self.frames_sent);
                }
            }
            Err(e) => log::debug!("session: dropping outbound frame: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    fn handle_event(&mut self, event: Option<InboundEvent>) {
        let event = event.unwrap_or(InboundEvent::Closed);
        if self.state != SessionState::Live {
            log::debug!("session: ignoring {} event in {:?}", event.kind(), self.state);
            return;
        }

        match event {
            InboundEvent::AudioChunk { bytes, mime_type } => self.play_chunk(&bytes, mime_type.as_deref()),
            InboundEvent::Interrupted => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    let stopped = scheduler.flush();
                    log::info!("session: interrupted, discarded {stopped} buffer(s)");
                }
            }
            InboundEvent::TurnComplete => {
                self.lock_status().turns_completed += 1;
                log::debug!("session: model turn complete");
            }
            InboundEvent::Closed => self.fail(SessionError::ConnectionClosed),
            InboundEvent::Error { message } => {
                log::warn!("session: transport error: {message}");
                self.fail(SessionError::ConnectionClosed);
            }
        }
    }

    fn play_chunk(&mut self, bytes: &[u8], mime_type: Option<&str>) {
        let buffer = match decode_chunk(bytes, mime_type, self.config.audio.playback_fallback_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("session: dropping audio chunk of {} bytes: {e}", bytes.len());
                return;
            }
        };
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        match scheduler.enqueue(buffer) {
            Ok(start_at) => {
                log::trace!("session: chunk scheduled at {start_at:.3}s");
                self.lock_status().chunks_played += 1;
            }
            Err(e) => log::warn!("session: dropping audio chunk: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Failure & teardown
    // -----------------------------------------------------------------------

    fn fail(&mut self, error: SessionError) {
        log::error!("session failed: {error}");
        self.set_state(SessionState::Failed);
        self.lock_status().last_error = Some(error.to_string());
        self.teardown();
        self.set_state(SessionState::Idle);
    }

    /// Release everything the session holds.  Safe to call repeatedly.
    fn teardown(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut remote) = self.remote.take() {
            remote.close();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.reset();
        }
        if let Some(output) = self.output.take() {
            output.close();
        }
        if let Some(meter) = self.meter.take() {
            meter.stop();
        }
        self.level.reset();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: SessionState) {
        let changed = self.state != state;
        if changed {
            log::debug!("session: {:?} → {:?}", self.state, state);
        }
        self.state = state;
        let mut status = self.lock_status();
        status.state = state;
        #[cfg(test)]
        if changed {
            status.transitions.push(state);
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StartSettings {
    session: SessionConfig,
    capture: CaptureSettings,
    playback: PlaybackSettings,
}

/// Open the speaker, then connect and open the microphone concurrently.  A
/// failed attempt releases whatever it did open.  When connect and capture
/// both fail the capture error wins, since it is the one the user can act on.
async fn establish(
    transport: &dyn Transport,
    microphone: &dyn Microphone,
    speaker: &dyn Speaker,
    settings: &StartSettings,
) -> Result<Established, SessionError> {
    let output = speaker.open(&settings.playback).await?;

    let (remote, capture) = tokio::join!(
        transport.connect(&settings.session),
        microphone.start(&settings.capture)
    );

    let result = match (remote, capture) {
        (Ok(remote), Ok(capture)) => {
            return Ok(Established { remote, capture, output });
        }
        (Ok(mut remote), Err(e)) => {
            remote.close();
            Err(e.into())
        }
        (Err(e), Ok(mut capture)) => {
            capture.stop();
            Err(e.into())
        }
        (Err(remote_err), Err(capture_err)) => {
            log::warn!("session: connect also failed: {remote_err}");
            Err(capture_err.into())
        }
    };
    output.close();
    result
}

async fn next_frame(capture: &mut Option<CaptureSession>) -> Option<AudioFrame> {
    match capture {
        Some(capture) => capture.next_frame().await,
        None => pending().await,
    }
}

async fn next_event(remote: &mut Option<RemoteSession>) -> Option<InboundEvent> {
    match remote {
        Some(remote) => remote.next_event().await,
        None => pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
