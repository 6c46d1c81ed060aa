//! UI-facing handle to the session orchestrator.

use std::sync::PoisonError;

use tokio::sync::mpsc;

use super::state::{SessionState, SessionStatus, SharedStatus};
use crate::meter::ActivityLevel;

/// Requests accepted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    /// `Start` when idle, otherwise `Stop`.
    Toggle,
}

/// Clonable, non-blocking control surface for the widget and hotkey.
///
/// Commands are queued with `try_send`; a full queue drops the command with a
/// warning rather than stalling the UI thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: SharedStatus,
    level: ActivityLevel,
}

impl SessionHandle {
    pub fn new(commands: mpsc::Sender<SessionCommand>, status: SharedStatus, level: ActivityLevel) -> Self {
        Self {
            commands,
            status,
            level,
        }
    }

    pub fn start(&self) {
        self.send(SessionCommand::Start);
    }

    pub fn stop(&self) {
        self.send(SessionCommand::Stop);
    }

    pub fn toggle(&self) {
        self.send(SessionCommand::Toggle);
    }

    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    pub fn activity_level(&self) -> f32 {
        self.level.get()
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot().last_error
    }

    pub fn snapshot(&self) -> SessionStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send(&self, command: SessionCommand) {
        if let Err(e) = self.commands.try_send(command) {
            log::warn!("session: dropping {command:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::new_shared_status;

    #[test]
    fn commands_are_queued_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx, new_shared_status(), ActivityLevel::new());

        handle.start();
        handle.toggle();
        handle.stop();

        assert_eq!(rx.try_recv().unwrap(), SessionCommand::Start);
        assert_eq!(rx.try_recv().unwrap(), SessionCommand::Toggle);
        assert_eq!(rx.try_recv().unwrap(), SessionCommand::Stop);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SessionHandle::new(tx, new_shared_status(), ActivityLevel::new());

        handle.start();
        handle.stop();

        assert_eq!(rx.try_recv().unwrap(), SessionCommand::Start);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reads_status_and_level() {
        let (tx, _rx) = mpsc::channel(1);
        let status = new_shared_status();
        let level = ActivityLevel::new();
        let handle = SessionHandle::new(tx, status.clone(), level.clone());

        {
            let mut st = status.lock().unwrap();
            st.state = SessionState::Failed;
            st.last_error = Some("connection closed".into());
        }
        level.set(0.25);

        assert_eq!(handle.state(), SessionState::Failed);
        assert_eq!(handle.last_error().as_deref(), Some("connection closed"));
        assert_eq!(handle.activity_level(), 0.25);
    }
}
