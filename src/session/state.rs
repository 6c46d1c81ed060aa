//! Session state machine and the status the UI reads.
//!
//! [`SessionState`] is owned by the orchestrator and mirrored into
//! [`SharedStatus`] on every transition so the egui loop can render it.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of one voice session.
///
/// ```text
/// Idle ──start──▶ Connecting ──connected + mic open──▶ Live
///                     │                                 │
///                     └──────── failure ────▶ Failed ◀──┤ remote closed / mic lost
///                                               │       │
///                                               ▼       ▼ stop
///                                              Idle ◀─ Closing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Live,
    Closing,
    Failed,
}

impl SessionState {
    /// `true` while a session holds (or is acquiring) devices and a socket.
    ///
    /// ```
    /// use voice_agent::session::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_active());
    /// assert!(SessionState::Connecting.is_active());
    /// assert!(SessionState::Live.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Live)
    }

    /// Short label for the widget.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Tap to talk",
            SessionState::Connecting => "Connecting…",
            SessionState::Live => "Listening",
            SessionState::Closing => "Closing…",
            SessionState::Failed => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// What the UI needs to know about the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Message from the last failed session.  Cleared by the next `start`.
    pub last_error: Option<String>,
    /// Model turns completed in the current session.
    pub turns_completed: u64,
    /// Audio chunks scheduled for playback in the current session.
    pub chunks_played: u64,
    /// Every state change, oldest first.
    #[cfg(test)]
    pub(crate) transitions: Vec<SessionState>,
}

/// Cheap to clone; lock briefly and never across `.await`.
pub type SharedStatus = Arc<Mutex<SessionStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(SessionStatus::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
