//! Real-time voice agent for the kiosk website.
//!
//! Microphone audio is framed as 16 kHz PCM16 and streamed to a Gemini Live
//! session; the model's spoken replies are decoded and scheduled back to back
//! on the speaker, and an interruption from the server flushes whatever has
//! not played yet.
//!
//! | Module | Role |
//! |--------|------|
//! | [`audio`] | PCM codec, chunk decoding, microphone capture |
//! | [`playback`] | gapless playback scheduling on a cpal output |
//! | [`remote`] | Gemini Live WebSocket transport |
//! | [`session`] | state machine tying capture, remote and playback together |
//! | [`meter`] | display-rate activity level for the widget |
//! | [`config`] | `settings.toml` persistence |
//! | [`hotkey`] | global toggle key |
//! | [`app`] | egui widget |

pub mod app;
pub mod audio;
pub mod config;
pub mod hotkey;
pub mod meter;
pub mod playback;
pub mod remote;
pub mod session;
