//! Gapless playback scheduling with barge-in flush.
//!
//! The scheduler keeps a cursor on the output clock: the time at which the
//! next buffer should begin.  Every buffer starts at `max(cursor, now)`, so
//! buffers arriving faster than real time queue back to back and a buffer
//! arriving after a stall starts immediately instead of in the past.
//!
//! ```text
//!   now        cursor
//!    │           │
//!    ▼           ▼
//!  ──┼──[ b0 ][ b1 ]──────────────► output clock
//!                └─ enqueue(b2) starts here
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::output::{AudioOutput, CompletionHook, PlaybackError, PlaybackId, ScheduledPlayback};
use crate::audio::AudioBuffer;

type LiveSet = Arc<Mutex<HashSet<PlaybackId>>>;

fn lock_live(live: &LiveSet) -> MutexGuard<'_, HashSet<PlaybackId>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    /// Seconds on the output clock.  Non-decreasing except on flush/reset.
    cursor: f64,
    /// Playbacks handed to the output and not yet finished or stopped.
    live: LiveSet,
    next_id: PlaybackId,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            cursor: 0.0,
            live: Arc::new(Mutex::new(HashSet::new())),
            next_id: 0,
        }
    }

    /// Schedule `buffer` right after everything already queued.
    ///
    /// Returns the start time on the output clock.  On error the cursor is
    /// left where it was.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Result<f64, PlaybackError> {
        let start_at = self.cursor.max(self.output.now());
        let duration = buffer.duration_secs();

        let id = self.next_id;
        self.next_id += 1;

        let live = Arc::clone(&self.live);
        let on_complete: CompletionHook = Box::new(move |id| {
            lock_live(&live).remove(&id);
        });

        // Registered before handing over: a real device may finish a short
        // buffer before `play` returns.
        lock_live(&self.live).insert(id);
        if let Err(e) = self
            .output
            .play(ScheduledPlayback::new(id, buffer, start_at, on_complete))
        {
            lock_live(&self.live).remove(&id);
            return Err(e);
        }

        self.cursor = start_at + duration;
        log::trace!("scheduler: #{id} at {start_at:.3}s for {duration:.3}s");
        Ok(start_at)
    }

    /// Stop everything queued or playing and move the cursor to now.
    ///
    /// Returns how many playbacks were stopped.  Idempotent.
    pub fn flush(&mut self) -> usize {
        let ids: Vec<PlaybackId> = lock_live(&self.live).drain().collect();
        // Stopping fires completion hooks, which take the live lock.
        for &id in &ids {
            self.output.stop(id);
        }
        self.cursor = self.output.now();
        ids.len()
    }

    /// Flush and rewind the cursor to zero.
    pub fn reset(&mut self) {
        self.flush();
        self.cursor = 0.0;
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn live_count(&self) -> usize {
        lock_live(&self.live).len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::output::MockOutput;

    fn buffer(seconds: f64) -> AudioBuffer {
        let rate = 24_000;
        AudioBuffer::new(vec![0.1; (seconds * rate as f64) as usize], rate)
    }

    fn scheduler() -> (Arc<MockOutput>, PlaybackScheduler) {
        let output = MockOutput::new();
        let sched = PlaybackScheduler::new(output.clone());
        (output, sched)
    }

    #[test]
    fn consecutive_buffers_are_gapless() {
        let (output, mut sched) = scheduler();
        output.set_now(1.0);

        let durations = [0.1, 0.25, 0.05];
        let mut expected = 1.0;
        for d in durations {
            let b = buffer(d);
            let d = b.duration_secs();
            assert_eq!(sched.enqueue(b).unwrap(), expected);
            expected += d;
        }
        assert_eq!(sched.cursor(), expected);
        assert_eq!(sched.live_count(), 3);
    }

    #[test]
    fn start_never_precedes_now() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(0.1)).unwrap();

        output.advance_to(5.0);
        assert_eq!(sched.enqueue(buffer(0.1)).unwrap(), 5.0);
    }

    #[test]
    fn completion_removes_from_live_set() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(0.1)).unwrap();
        sched.enqueue(buffer(0.1)).unwrap();

        output.advance_to(0.15);
        assert_eq!(sched.live_count(), 1);
        output.advance_to(1.0);
        assert_eq!(sched.live_count(), 0);
    }

    #[test]
    fn flush_stops_everything_and_moves_cursor_to_now() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(0.5)).unwrap();
        sched.enqueue(buffer(0.5)).unwrap();

        output.set_now(0.2);
        assert_eq!(sched.flush(), 2);

        assert_eq!(output.stopped_ids().len(), 2);
        assert_eq!(output.playing_count(), 0);
        assert_eq!(sched.live_count(), 0);
        assert_eq!(sched.cursor(), 0.2);
    }

    #[test]
    fn enqueue_after_flush_starts_now() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(1.0)).unwrap();
        output.set_now(0.3);
        sched.flush();

        assert_eq!(sched.enqueue(buffer(0.1)).unwrap(), 0.3);
    }

    #[test]
    fn flush_is_idempotent() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(0.2)).unwrap();
        sched.flush();
        assert_eq!(sched.flush(), 0);
        assert_eq!(output.stopped_ids().len(), 1);
    }

    #[test]
    fn flush_after_natural_completion_stops_nothing() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(0.1)).unwrap();
        output.advance_to(0.5);

        assert_eq!(sched.flush(), 0);
        assert!(output.stopped_ids().is_empty());
    }

    #[test]
    fn reset_rewinds_cursor_to_zero() {
        let (output, mut sched) = scheduler();
        output.set_now(2.0);
        sched.enqueue(buffer(0.4)).unwrap();
        sched.reset();
        assert_eq!(sched.cursor(), 0.0);
        assert_eq!(sched.live_count(), 0);
    }

    #[test]
    fn failed_play_leaves_state_untouched() {
        let (output, mut sched) = scheduler();
        sched.enqueue(buffer(0.1)).unwrap();
        let cursor = sched.cursor();

        output.close();
        assert!(matches!(sched.enqueue(buffer(0.1)), Err(PlaybackError::Closed)));
        assert_eq!(sched.cursor(), cursor);
        assert_eq!(sched.live_count(), 0);
    }
}
