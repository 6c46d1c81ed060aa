//! Voice session lifecycle.
//!
//! ```text
//!  widget / hotkey
//!       │ SessionHandle::{start, stop, toggle}
//!       ▼
//!  mpsc<SessionCommand> ──► SessionOrchestrator::run (tokio task)
//!                               │ owns RemoteSession, CaptureSession,
//!                               │ PlaybackScheduler, ActivityMeter
//!                               ▼
//!                          SharedStatus ◄── SessionHandle::state / last_error
//! ```
//!
//! The orchestrator is the only writer of [`SessionState`]; the UI polls a
//! snapshot every frame.

pub mod handle;
pub mod orchestrator;
pub mod state;

pub use handle::{SessionCommand, SessionHandle};
pub use orchestrator::{SessionError, SessionOrchestrator};
pub use state::{new_shared_status, SessionState, SessionStatus, SharedStatus};
