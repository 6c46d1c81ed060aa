//! Fixed-length capture frames and the slicer that produces them.

use super::pcm::{float_to_i16, i16_to_le_bytes};

/// Sample rate of every outbound frame.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Samples per outbound frame (≈ 256 ms at 16 kHz).
pub const DEFAULT_FRAME_SAMPLES: usize = 4_096;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// One mono chunk of microphone audio, quantised to PCM16.
///
/// Immutable once built.  Frames are consumed by the remote session, which
/// serialises them with [`to_pcm_bytes`](Self::to_pcm_bytes) and
/// [`mime_type`](Self::mime_type).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Quantise float samples into a frame.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(samples.iter().map(|&s| float_to_i16(s)).collect(), sample_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always mono.
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian PCM16 payload.
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        i16_to_le_bytes(&self.samples)
    }

    /// MIME type announcing this frame's encoding, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// FrameSlicer
// ---------------------------------------------------------------------------

/// Accumulates a continuous mono stream and cuts it into equal frames.
///
/// Runs inside the capture callback, so it never blocks and only allocates
/// for the frames it emits.
pub struct FrameSlicer {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameSlicer {
    /// # Panics
    ///
    /// Panics if `frame_samples == 0`.
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        assert!(frame_samples > 0, "frame size must be > 0");
        Self {
            frame_samples,
            sample_rate,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Feed samples; returns every frame completed by this push.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_samples;
        if complete == 0 {
            return Vec::new();
        }

        let frames = self
            .pending
            .chunks_exact(self.frame_samples)
            .map(|chunk| AudioFrame::from_f32(chunk, self.sample_rate))
            .collect();
        self.pending.drain(..complete * self.frame_samples);
        frames
    }

    /// Samples waiting for the next frame boundary.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_mono_pcm_at_its_rate() {
        let frame = AudioFrame::from_f32(&[1.0, -1.0, 0.0], CAPTURE_SAMPLE_RATE);
        assert_eq!(frame.samples(), &[i16::MAX, i16::MIN, 0]);
        assert_eq!(frame.channels(), 1);
        assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(frame.to_pcm_bytes(), vec![0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn slicer_holds_partial_input() {
        let mut slicer = FrameSlicer::new(4, 16_000);
        assert!(slicer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(slicer.pending_len(), 3);
    }

    #[test]
    fn slicer_emits_fixed_frames_and_keeps_remainder() {
        let mut slicer = FrameSlicer::new(4, 16_000);
        slicer.push(&[0.0; 3]);
        let frames = slicer.push(&[0.5; 10]);

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4 && f.sample_rate() == 16_000));
        assert_eq!(slicer.pending_len(), 1);

        // Continuity: the first frame starts with the three held samples.
        assert_eq!(frames[0].samples()[..3], [0, 0, 0]);
        assert_eq!(frames[0].samples()[3], float_to_i16(0.5));
    }

    #[test]
    fn clear_discards_pending() {
        let mut slicer = FrameSlicer::new(DEFAULT_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE);
        slicer.push(&[0.0; 100]);
        slicer.clear();
        assert_eq!(slicer.pending_len(), 0);
    }

    #[test]
    #[should_panic(expected = "frame size must be > 0")]
    fn zero_frame_size_panics() {
        let _ = FrameSlicer::new(0, 16_000);
    }
}
