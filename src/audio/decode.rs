//! Turning inbound audio chunks into playable buffers.
//!
//! The model normally announces `audio/pcm;rate=24000`, in which case the
//! payload is raw PCM16.  Any other MIME type is first offered to the WAV
//! container decoder; if that fails the bytes are treated as raw PCM16 at the
//! announced (or fallback) rate.  The heuristic is best-effort: a payload in
//! an unknown container that happens to have an even length will play as
//! noise rather than fail.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use super::pcm::{decode_pcm16, is_raw_pcm_mime, sample_rate_from_mime, CodecError};
use super::resample::downmix_to_mono;

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// Decoded mono audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds.  Zero when the rate is zero.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// decode_chunk
// ---------------------------------------------------------------------------

/// Decode one inbound audio chunk.
///
/// `fallback_rate` applies when the MIME type carries no usable `rate=`.
///
/// # Errors
///
/// [`CodecError::Malformed`] when the payload holds no complete sample.
pub fn decode_chunk(
    bytes: &[u8],
    mime_type: Option<&str>,
    fallback_rate: u32,
) -> Result<AudioBuffer, CodecError> {
    if let Some(mime) = mime_type.filter(|m| !is_raw_pcm_mime(m)) {
        match decode_container(bytes) {
            Ok(buffer) => return Ok(buffer),
            Err(e) => log::debug!("decode: {mime} is not a readable container ({e}), trying raw PCM"),
        }
    }
    decode_raw(bytes, sample_rate_from_mime(mime_type, fallback_rate))
}

fn decode_raw(bytes: &[u8], sample_rate: u32) -> Result<AudioBuffer, CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Malformed(format!(
            "{} byte(s) is not a PCM16 payload",
            bytes.len()
        )));
    }
    Ok(AudioBuffer::new(decode_pcm16(bytes), sample_rate))
}

fn decode_container(bytes: &[u8]) -> Result<AudioBuffer, hound::Error> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(AudioBuffer::new(
        downmix_to_mono(&interleaved, spec.channels),
        spec.sample_rate,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_pcm16;

    fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn pcm_mime_decodes_raw_at_announced_rate() {
        let bytes = encode_pcm16(&vec![0.25; 2_400]);
        let buf = decode_chunk(&bytes, Some("audio/pcm;rate=24000"), 16_000).unwrap();
        assert_eq!(buf.sample_rate(), 24_000);
        assert_eq!(buf.len(), 2_400);
        assert!((buf.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn missing_mime_uses_fallback_rate() {
        let bytes = encode_pcm16(&[0.1, 0.2]);
        let buf = decode_chunk(&bytes, None, 24_000).unwrap();
        assert_eq!(buf.sample_rate(), 24_000);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn wav_container_is_decoded_with_header_rate() {
        // Stereo frames: (16384, 16384) and (-16384, 0)
        let bytes = wav_bytes(&[16_384, 16_384, -16_384, 0], 2, 22_050);
        let buf = decode_chunk(&bytes, Some("audio/wav"), 24_000).unwrap();

        assert_eq!(buf.sample_rate(), 22_050);
        assert_eq!(buf.len(), 2);
        assert!((buf.samples()[0] - 0.5).abs() < 1e-6);
        assert!((buf.samples()[1] + 0.25).abs() < 1e-6);
    }

    #[test]
    fn unreadable_container_falls_back_to_raw_pcm() {
        let bytes = encode_pcm16(&[0.5, -0.5, 0.0]);
        let buf = decode_chunk(&bytes, Some("audio/mpeg;rate=16000"), 24_000).unwrap();
        assert_eq!(buf.sample_rate(), 16_000);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn empty_payload_is_malformed() {
        assert!(matches!(
            decode_chunk(&[], Some("audio/pcm;rate=24000"), 24_000),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_chunk(&[0x01], Some("audio/ogg"), 24_000),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn zero_rate_buffer_has_zero_duration() {
        assert_eq!(AudioBuffer::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }
}
