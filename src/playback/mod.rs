//! Streamed model audio → gapless playback on the output device.
//!
//! [`PlaybackScheduler`] decides *when* each decoded buffer plays;
//! an [`AudioOutput`] (normally [`CpalOutput`], opened through
//! [`CpalSpeaker`]) does the playing and exposes the analysis tap the
//! activity meter reads.

pub mod output;
pub mod scheduler;

pub use output::{
    AnalysisTap, AudioOutput, CompletionHook, CpalOutput, CpalSpeaker, PlaybackError, PlaybackId,
    PlaybackSettings, ScheduledPlayback, Speaker,
};
pub use scheduler::PlaybackScheduler;

#[cfg(test)]
pub use output::{MockOutput, MockSpeaker};
