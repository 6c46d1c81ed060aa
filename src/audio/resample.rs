//! Channel mixing and sample-rate conversion.
//!
//! Both directions of the session go through here: microphone audio is
//! downmixed and brought to the 16 kHz wire rate, and model audio (usually
//! 24 kHz) is brought up to whatever rate the output device runs at.
//!
//! Conversion is linear interpolation.  It is cheap enough to run inside a
//! cpal callback and good enough for speech.

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Average interleaved multi-channel audio down to mono.
///
/// The output length is `samples.len() / channels`; a trailing partial frame
/// is dropped.  `channels == 0` yields an empty vector.
///
/// ```rust
/// use voice_agent::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `from_rate` to `to_rate`.
///
/// Equal rates return a copy.  A zero rate on either side returns an empty
/// vector.  The output length is `ceil(len * to_rate / from_rate)`.
///
/// ```rust
/// use voice_agent::audio::resample_linear;
///
/// let hi = vec![0.5_f32; 480];          // 10 ms @ 48 kHz
/// let lo = resample_linear(&hi, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);            // 10 ms @ 16 kHz
/// ```
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = pos as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Linear resampler for a continuous stream delivered in blocks.
///
/// The fractional read position and the last input sample carry over from
/// one [`process`](Self::process) call to the next, so block boundaries add
/// neither extra samples nor discontinuities.  The output for a stream split
/// into blocks equals the output for the same stream in one call.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// Next output position in input samples, relative to the start of the
    /// next block.  `-1.0 ..= 0.0` interpolates from `prev`.
    pos: f64,
    prev: Option<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            pos: 0.0,
            prev: None,
        }
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }
        if input.is_empty() || self.from_rate == 0 || self.to_rate == 0 {
            return Vec::new();
        }

        let step = self.from_rate as f64 / self.to_rate as f64;
        let len = input.len() as f64;
        let mut out = Vec::with_capacity((len / step).ceil() as usize + 1);

        // Positions in [len - 1, len) need the next block's first sample.
        while self.pos < len - 1.0 {
            let idx = self.pos.floor();
            let frac = (self.pos - idx) as f32;
            let (s0, s1) = if idx < 0.0 {
                (self.prev.unwrap_or(input[0]), input[0])
            } else {
                let i = idx as usize;
                (input[i], input[i + 1])
            };
            out.push(s0 * (1.0 - frac) + s1 * frac);
            self.pos += step;
        }

        self.pos -= len;
        self.prev = input.last().copied();
        out
    }

    /// Forget the carried position, e.g. before reusing on a new stream.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- downmix_to_mono ---------------------------------------------------

    #[test]
    fn mono_input_passes_through() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn stereo_is_averaged() {
        let out = downmix_to_mono(&[1.0_f32, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn partial_trailing_frame_is_dropped() {
        let out = downmix_to_mono(&[0.2_f32, 0.2, 0.9], 2);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn zero_channels_yield_nothing() {
        assert!(downmix_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    // ---- resample_linear ---------------------------------------------------

    #[test]
    fn equal_rates_are_a_copy() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn empty_or_zero_rate_yields_nothing() {
        assert!(resample_linear(&[], 48_000, 16_000).is_empty());
        assert!(resample_linear(&[0.1, 0.2], 0, 16_000).is_empty());
        assert!(resample_linear(&[0.1, 0.2], 16_000, 0).is_empty());
    }

    #[test]
    fn downsample_44100_to_16k_length() {
        let out = resample_linear(&vec![0.0_f32; 44_100], 44_100, 16_000);
        assert!(out.len().abs_diff(16_000) <= 1, "got {}", out.len());
    }

    #[test]
    fn upsample_24k_to_48k_doubles_length() {
        let out = resample_linear(&vec![0.0_f32; 2_400], 24_000, 48_000);
        assert_eq!(out.len(), 4_800);
    }

    #[test]
    fn dc_signal_keeps_its_level() {
        for (from, to) in [(48_000, 16_000), (24_000, 44_100), (16_000, 48_000)] {
            let out = resample_linear(&vec![0.5_f32; 480], from, to);
            assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-5), "{from} -> {to}");
        }
    }

    #[test]
    fn upsampling_interpolates_between_neighbours() {
        let out = resample_linear(&[0.0_f32, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
        // Past the last input sample the value is held.
        assert_eq!(out[3], 1.0);
    }

    // ---- StreamResampler ---------------------------------------------------

    #[test]
    fn blocks_resample_like_one_continuous_call() {
        let ramp: Vec<f32> = (0..51_200).map(|i| i as f32 / 51_200.0).collect();

        let whole = StreamResampler::new(44_100, 16_000).process(&ramp);
        let mut blocked = Vec::new();
        let mut resampler = StreamResampler::new(44_100, 16_000);
        for block in ramp.chunks(512) {
            blocked.extend(resampler.process(block));
        }

        assert_eq!(blocked.len(), whole.len());
        for (a, b) in blocked.iter().zip(&whole) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn blocks_do_not_gain_samples() {
        let mut resampler = StreamResampler::new(44_100, 16_000);
        let total: usize = (0..100).map(|_| resampler.process(&[0.0; 512]).len()).sum();
        // 51 200 samples at 44.1 kHz is 18 576.87 samples at 16 kHz.
        assert!(total.abs_diff(18_577) <= 1, "got {total}");
        // Stateless per-block conversion rounds every block up.
        let stateless: usize = (0..100).map(|_| resample_linear(&[0.0; 512], 44_100, 16_000).len()).sum();
        assert_eq!(stateless, 18_600);
    }

    #[test]
    fn ramp_stays_continuous_across_block_edges() {
        let ramp: Vec<f32> = (0..4_410).map(|i| i as f32).collect();
        let mut resampler = StreamResampler::new(44_100, 16_000);
        let mut out = Vec::new();
        for block in ramp.chunks(441) {
            out.extend(resampler.process(block));
        }
        let step = 44_100.0 / 16_000.0;
        for (j, &s) in out.iter().enumerate() {
            assert!((s as f64 - j as f64 * step).abs() < 1e-2, "sample {j}: {s}");
        }
    }

    #[test]
    fn stream_equal_rates_pass_through() {
        let mut resampler = StreamResampler::new(16_000, 16_000);
        assert_eq!(resampler.process(&[0.1, 0.2]), vec![0.1, 0.2]);
    }
}
