//! Spectrum-based loudness estimate for the activity meter.
//!
//! Mirrors a browser `AnalyserNode` feeding `getByteFrequencyData`:
//!
//! 1. Blackman window over the last `fft_size` samples.
//! 2. Magnitude of the first `fft_size / 2` DFT bins, scaled by `1 / N`.
//! 3. Exponential smoothing against the previous frame.
//! 4. Decibels mapped linearly from `[min_db, max_db]` onto `[0, 1]`.
//!
//! The level is the mean of the mapped bins times `255 / 128`, clamped to
//! `[0, 1]`, which is the byte-average-over-128 the widget was tuned for.

use std::f32::consts::PI;

use crate::config::MeterConfig;

pub struct SpectrumAnalyzer {
    fft_size: usize,
    window: Vec<f32>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl SpectrumAnalyzer {
    /// A non-power-of-two or tiny `fft_size` is rounded up to a power of two
    /// of at least 32.
    pub fn new(cfg: &MeterConfig) -> Self {
        let n = cfg.fft_size.max(32).next_power_of_two();
        let (min_db, max_db) = if cfg.max_db > cfg.min_db {
            (cfg.min_db, cfg.max_db)
        } else {
            (MeterConfig::default().min_db, MeterConfig::default().max_db)
        };

        Self {
            fft_size: n,
            window: blackman(n),
            cos_table: (0..n).map(|i| (2.0 * PI * i as f32 / n as f32).cos()).collect(),
            sin_table: (0..n).map(|i| (2.0 * PI * i as f32 / n as f32).sin()).collect(),
            smoothed: vec![0.0; n / 2],
            smoothing: cfg.smoothing.clamp(0.0, 1.0),
            min_db,
            max_db,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Analyse the most recent samples and return a level in `[0, 1]`.
    ///
    /// Fewer than `fft_size` samples are zero-padded at the front; more are
    /// truncated to the newest `fft_size`.
    pub fn level(&mut self, samples: &[f32]) -> f32 {
        let n = self.fft_size;
        let tail = &samples[samples.len().saturating_sub(n)..];
        let pad = n - tail.len();

        let mut frame = vec![0.0_f32; n];
        for (i, &s) in tail.iter().enumerate() {
            frame[pad + i] = s * self.window[pad + i];
        }

        let range = self.max_db - self.min_db;
        let mut total = 0.0_f32;
        for k in 0..n / 2 {
            let (mut re, mut im) = (0.0_f32, 0.0_f32);
            for (t, &x) in frame.iter().enumerate() {
                let idx = (k * t) % n;
                re += x * self.cos_table[idx];
                im -= x * self.sin_table[idx];
            }
            let magnitude = (re * re + im * im).sqrt() / n as f32;
            let smoothed = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[k] = smoothed;

            let db = 20.0 * smoothed.max(f32::MIN_POSITIVE).log10();
            total += ((db - self.min_db) / range).clamp(0.0, 1.0);
        }

        let mean = total / (n / 2) as f32;
        (mean * 255.0 / 128.0).clamp(0.0, 1.0)
    }

    /// Forget the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

fn blackman(n: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = (1.0 - ALPHA) / 2.0;
    let a1 = 0.5;
    let a2 = ALPHA / 2.0;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
