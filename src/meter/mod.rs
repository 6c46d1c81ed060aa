//! Activity meter: a display-rate loudness level for the widget.
//!
//! While a session is connecting or live, [`ActivityMeter`] samples the
//! output analysis tap on a tokio interval and publishes a level in
//! `[0, 1]` through [`ActivityLevel`].  The meter only reads audio; it never
//! touches session state.
//!
//! ```rust,no_run
//! use std::sync::{Arc, Mutex};
//! use voice_agent::audio::RingBuffer;
//! use voice_agent::config::MeterConfig;
//! use voice_agent::meter::{ActivityLevel, ActivityMeter};
//!
//! # async fn demo() {
//! let tap = Arc::new(Mutex::new(RingBuffer::new(2_048)));
//! let level = ActivityLevel::new();
//! let meter = ActivityMeter::spawn(tap, level.clone(), &MeterConfig::default());
//! println!("{:.2}", level.get());
//! meter.stop(); // level is back to 0.0
//! # }
//! ```

pub mod spectrum;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::MeterConfig;
use crate::playback::AnalysisTap;

pub use spectrum::SpectrumAnalyzer;

// ---------------------------------------------------------------------------
// ActivityLevel
// ---------------------------------------------------------------------------

/// Shared lock-free level in `[0, 1]`.  Readers may see a slightly stale
/// value.
#[derive(Debug, Clone, Default)]
pub struct ActivityLevel(Arc<AtomicU32>);

impl ActivityLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store `level`, clamped to `[0, 1]`.  NaN stores 0.
    pub fn set(&self, level: f32) {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

// ---------------------------------------------------------------------------
// ActivityMeter
// ---------------------------------------------------------------------------

/// Handle to the running sampling task.  Dropping it cancels the task.
pub struct ActivityMeter {
    task: JoinHandle<()>,
    level: ActivityLevel,
}

impl ActivityMeter {
    /// Start sampling `tap` at `cfg.tick_hz`.  Must be called inside a tokio
    /// runtime.
    pub fn spawn(tap: AnalysisTap, level: ActivityLevel, cfg: &MeterConfig) -> Self {
        let mut analyzer = SpectrumAnalyzer::new(cfg);
        let period = Duration::from_secs_f64(1.0 / cfg.tick_hz.max(1) as f64);
        let out = level.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let window = tap
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .latest(analyzer.fft_size());
                out.set(analyzer.level(&window));
            }
        });

        log::debug!("meter: sampling at {} Hz", cfg.tick_hz.max(1));
        Self { task, level }
    }

    /// Cancel sampling and zero the level.
    pub fn stop(self) {
        self.task.abort();
        self.level.reset();
    }
}

impl Drop for ActivityMeter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RingBuffer;
    use std::sync::Mutex;

    #[test]
    fn level_is_clamped() {
        let level = ActivityLevel::new();
        assert_eq!(level.get(), 0.0);
        level.set(3.0);
        assert_eq!(level.get(), 1.0);
        level.set(-1.0);
        assert_eq!(level.get(), 0.0);
        level.set(f32::NAN);
        assert_eq!(level.get(), 0.0);
        level.set(0.42);
        assert_eq!(level.get(), 0.42);
    }

    #[test]
    fn clones_share_the_value() {
        let a = ActivityLevel::new();
        let b = a.clone();
        a.set(0.7);
        assert_eq!(b.get(), 0.7);
    }

    #[tokio::test]
    async fn meter_tracks_the_tap_and_resets_on_stop() {
        let tap: AnalysisTap = Arc::new(Mutex::new(RingBuffer::new(1_024)));
        let samples: Vec<f32> = (0..1_024)
            .map(|i| ((i * 7_919) % 200) as f32 / 200.0 - 0.5)
            .collect();
        tap.lock().unwrap().push_slice(&samples);

        let level = ActivityLevel::new();
        let cfg = MeterConfig {
            tick_hz: 200,
            smoothing: 0.0,
            ..MeterConfig::default()
        };
        let meter = ActivityMeter::spawn(tap, level.clone(), &cfg);

        let mut seen = 0.0;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            seen = level.get();
            if seen > 0.0 {
                break;
            }
        }
        assert!(seen > 0.0, "meter never reported a level");

        meter.stop();
        assert_eq!(level.get(), 0.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(level.get(), 0.0);
    }
}
