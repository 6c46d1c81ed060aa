//! PCM16 codec and base64 transport encoding.
//!
//! The remote model exchanges audio as 16-bit little-endian PCM wrapped in
//! base64 text.  Every function here is pure.
//!
//! # Example
//!
//! ```rust
//! use voice_agent::audio::{decode_pcm16, encode_pcm16, transport_decode, transport_encode};
//!
//! let bytes = encode_pcm16(&[0.0, 0.5, -0.5]);
//! assert_eq!(bytes.len(), 6);
//!
//! let text = transport_encode(&bytes);
//! let back = transport_decode(&text).unwrap();
//! assert_eq!(back, bytes);
//!
//! let samples = decode_pcm16(&back);
//! assert!((samples[1] - 0.5).abs() < 1e-4);
//! ```

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;

/// Playback rate assumed when an inbound MIME type carries no usable `rate=`.
pub const DEFAULT_PLAYBACK_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Errors raised while turning inbound payloads back into audio.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The transport text was not valid base64.
    #[error("malformed transport payload: {0}")]
    Decode(String),

    /// Neither the container decoder nor the raw PCM fallback could make
    /// sense of the payload.
    #[error("audio payload could not be interpreted: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Convert one float sample to signed 16-bit.
///
/// The input is clamped to `[-1.0, 1.0]`; negative values scale by 32768 and
/// positive values by 32767, so both ends of the range map onto the full
/// `i16` span.
pub fn float_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

/// Encode float samples as 16-bit little-endian PCM bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&float_to_i16(s).to_le_bytes());
    }
    out
}

/// Serialise already-quantised samples as little-endian bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM bytes into floats in `[-1.0, 1.0)`.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

// ---------------------------------------------------------------------------
// Transport encoding
// ---------------------------------------------------------------------------

/// Encode bytes as standard (padded) base64.
pub fn transport_encode(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode standard base64 text.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when `text` is not valid base64.
pub fn transport_decode(text: &str) -> Result<Vec<u8>, CodecError> {
    B64.decode(text.trim())
        .map_err(|e| CodecError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// MIME helpers
// ---------------------------------------------------------------------------

/// Extract the sample rate from a MIME type such as `audio/pcm;rate=24000`.
///
/// Returns `fallback` when `mime_type` is `None`, has no `rate=` parameter,
/// or the value is not a positive integer.
///
/// ```rust
/// use voice_agent::audio::sample_rate_from_mime;
///
/// assert_eq!(sample_rate_from_mime(Some("audio/pcm;rate=16000"), 24_000), 16_000);
/// assert_eq!(sample_rate_from_mime(Some("audio/pcm"), 24_000), 24_000);
/// assert_eq!(sample_rate_from_mime(None, 24_000), 24_000);
/// ```
pub fn sample_rate_from_mime(mime_type: Option<&str>, fallback: u32) -> u32 {
    let Some(mime) = mime_type else {
        return fallback;
    };
    let Some(idx) = mime.find("rate=") else {
        return fallback;
    };
    let digits: String = mime[idx + "rate=".len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    match digits.parse::<u32>() {
        Ok(rate) if rate > 0 => rate,
        _ => fallback,
    }
}

/// `true` when the MIME type announces raw PCM (`audio/pcm`, `audio/L16;...pcm`).
pub fn is_raw_pcm_mime(mime_type: &str) -> bool {
    mime_type.to_ascii_lowercase().contains("pcm")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_maps_to_i16_extremes() {
        assert_eq!(float_to_i16(1.0), i16::MAX);
        assert_eq!(float_to_i16(-1.0), i16::MIN);
        assert_eq!(float_to_i16(0.0), 0);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        assert_eq!(float_to_i16(3.5), i16::MAX);
        assert_eq!(float_to_i16(-7.0), i16::MIN);
    }

    #[test]
    fn encode_is_little_endian() {
        let bytes = encode_pcm16(&[1.0, -1.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80]);
    }

    #[test]
    fn pcm_round_trip_stays_within_quantisation() {
        let input: Vec<f32> = (0..2_000).map(|i| ((i as f32) * 0.013).sin() * 0.9).collect();
        let decoded = decode_pcm16(&encode_pcm16(&input));

        assert_eq!(decoded.len(), input.len());
        for (a, b) in input.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= 2.0 / 32_768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn decode_ignores_trailing_odd_byte() {
        let decoded = decode_pcm16(&[0x00, 0x40, 0x7F]);
        assert_eq!(decoded, vec![0.5]);
    }

    #[test]
    fn i16_bytes_match_float_encoding() {
        let samples = [0.25_f32, -0.75, 0.0];
        let quantised: Vec<i16> = samples.iter().map(|&s| float_to_i16(s)).collect();
        assert_eq!(i16_to_le_bytes(&quantised), encode_pcm16(&samples));
    }

    #[test]
    fn transport_round_trip_preserves_bytes() {
        let cases: [&[u8]; 4] = [&[], &[0], &[0xFF, 0x00, 0x7F], b"any binary \x00\x01\x02 payload"];
        for bytes in cases {
            assert_eq!(transport_decode(&transport_encode(bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn transport_decode_rejects_garbage() {
        assert!(matches!(transport_decode("@@not base64@@"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn mime_rate_parsing() {
        assert_eq!(sample_rate_from_mime(Some("audio/pcm;rate=24000"), 1), 24_000);
        assert_eq!(sample_rate_from_mime(Some("audio/pcm; rate=8000; x=y"), 1), 8_000);
        assert_eq!(sample_rate_from_mime(Some("audio/pcm;rate=abc"), 24_000), 24_000);
        assert_eq!(sample_rate_from_mime(Some("audio/pcm;rate=0"), 24_000), 24_000);
        assert_eq!(sample_rate_from_mime(Some("audio/wav"), 24_000), 24_000);
        assert_eq!(sample_rate_from_mime(None, DEFAULT_PLAYBACK_RATE), 24_000);
    }

    #[test]
    fn raw_pcm_mime_detection() {
        assert!(is_raw_pcm_mime("audio/pcm;rate=24000"));
        assert!(is_raw_pcm_mime("audio/PCM"));
        assert!(!is_raw_pcm_mime("audio/wav"));
    }
}
