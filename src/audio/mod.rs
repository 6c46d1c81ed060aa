//! Audio plumbing for microphone capture, the PCM codec and chunk decoding.
//!
//! # Pipeline
//!
//! ```text
//! outbound:  Microphone → cpal callback → downmix_to_mono → StreamResampler(16 kHz)
//!            → FrameSlicer → AudioFrame (mpsc) → CaptureSession::next_frame
//!
//! inbound:   base64 text → transport_decode → decode_chunk → AudioBuffer
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voice_agent::audio::{CaptureSettings, CpalMicrophone, Microphone};
//!
//! # async fn demo() -> Result<(), voice_agent::audio::CaptureError> {
//! let mut capture = CpalMicrophone.start(&CaptureSettings::default()).await?;
//! if let Some(frame) = capture.next_frame().await {
//!     println!("{} ({} samples)", frame.mime_type(), frame.len());
//! }
//! capture.stop();
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod capture;
pub mod decode;
pub mod frame;
pub mod pcm;
pub mod resample;

pub use buffer::RingBuffer;
pub use capture::{CaptureError, CaptureSession, CaptureSettings, CpalMicrophone, Microphone};
pub use decode::{decode_chunk, AudioBuffer};
pub use frame::{AudioFrame, FrameSlicer, CAPTURE_SAMPLE_RATE, DEFAULT_FRAME_SAMPLES};
pub use pcm::{
    decode_pcm16, encode_pcm16, float_to_i16, sample_rate_from_mime, transport_decode,
    transport_encode, CodecError, DEFAULT_PLAYBACK_RATE,
};
pub use resample::{downmix_to_mono, resample_linear, StreamResampler};

#[cfg(test)]
pub use capture::MockMicrophone;
