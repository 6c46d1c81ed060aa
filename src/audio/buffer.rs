//! Fixed-capacity circular buffer backing the output analysis tap.
//!
//! The output mixer pushes every rendered block here; the activity meter
//! reads the most recent window without consuming it.  When full, new samples
//! overwrite the oldest ones.
//!
//! ```rust
//! use voice_agent::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(buf.latest(2), vec![4.0, 5.0]);
//! assert_eq!(buf.latest(8), vec![2.0, 3.0, 4.0, 5.0]);
//! ```

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer over `Copy` scalars.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the next write position.
    write_pos: usize,
    /// Number of valid samples (≤ `capacity`).
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a new ring buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            write_pos: 0,
            len: 0,
        }
    }

    /// Append `data`, overwriting the oldest samples once full.
    pub fn push_slice(&mut self, data: &[T]) {
        // Only the tail can survive when the input alone overflows.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        for &item in data {
            self.buf[self.write_pos] = item;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
        self.len = (self.len + data.len()).min(self.capacity);
    }

    /// Copy out the newest `count` samples in chronological order.
    ///
    /// Returns fewer than `count` samples when fewer are stored.  The buffer
    /// is left untouched.
    pub fn latest(&self, count: usize) -> Vec<T> {
        let count = count.min(self.len);
        let start = (self.write_pos + self.capacity - count) % self.capacity;
        (0..count)
            .map(|i| self.buf[(start + i) % self.capacity])
            .collect()
    }

    /// Discard all samples.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
