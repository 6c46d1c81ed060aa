//! Remote conversational model session.
//!
//! [`Transport::connect`] yields a [`RemoteSession`]: a non-blocking outbound
//! queue for [`AudioFrame`](crate::audio::AudioFrame)s and an ordered stream
//! of [`InboundEvent`]s.  [`GeminiTransport`] speaks the Live
//! `BidiGenerateContent` protocol defined in [`protocol`].

pub mod gemini;
pub mod protocol;
pub mod session;

pub use gemini::GeminiTransport;
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{InboundEvent, OutboundMessage, RemoteError, RemoteSession, TransmitError, Transport};

#[cfg(test)]
pub use session::{MockLink, MockTransport};
