//! Power of two sized circular sample buffers.

use assume::assume;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Mono circular record buffer with a power of two capacity and masked indexing.
///
/// Samples are written at a running write cursor, which wraps around at the buffer's capacity.
/// Reads may use any index: they get masked into the buffer's range, so `read_at(i)` and
/// `read_at(i + k * capacity)` always address the same sample.
///
/// Growing the buffer via [`ensure_capacity`](Self::ensure_capacity) discards the buffer's
/// contents and resets the write cursor: positions which refer to the old buffer are invalid
/// after the buffer got replaced.
#[derive(Debug, Clone)]
pub struct CircularSampleBuffer {
    buffer: Vec<f32>,
    buffer_mask: usize,
    write_pos: usize,
}

impl CircularSampleBuffer {
    /// Capacity of newly created engine buffers, before the sample rate is known.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a new, silent buffer which can hold at least `required_samples` samples.
    pub fn new(required_samples: usize) -> Result<Self, Error> {
        let capacity = Self::capacity_for(required_samples)?;
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(capacity)?;
        buffer.resize(capacity, 0.0);
        let buffer_mask = capacity - 1;
        let write_pos = 0;
        Ok(Self {
            buffer,
            buffer_mask,
            write_pos,
        })
    }

    /// The smallest power of two capacity which can hold `required_samples`.
    pub fn capacity_for(required_samples: usize) -> Result<usize, Error> {
        required_samples
            .max(1)
            .checked_next_power_of_two()
            .ok_or_else(|| {
                Error::AllocationError(format!(
                    "A buffer of {required_samples} samples exceeds the addressable memory"
                ))
            })
    }

    /// Number of samples the buffer holds. Always a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Index mask: `capacity - 1`.
    #[inline]
    pub fn mask(&self) -> usize {
        self.buffer_mask
    }

    /// Current, already wrapped write cursor.
    #[inline]
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Wrapped distance from `from` to `to`, both being buffer positions.
    #[inline]
    pub fn distance(&self, from: usize, to: usize) -> usize {
        debug_assert!(from <= self.buffer_mask && to <= self.buffer_mask);
        (to + self.capacity() - from) & self.buffer_mask
    }

    /// Store a sample at the write cursor and move the cursor.
    #[inline]
    pub fn write(&mut self, sample: f32) {
        let index = self.write_pos;
        assume!(unsafe: index < self.buffer.len(), "Write position is always masked");
        self.buffer[index] = sample;
        self.write_pos = (self.write_pos + 1) & self.buffer_mask;
    }

    /// Read a sample at the given, possibly unwrapped, index.
    #[inline]
    pub fn read_at(&self, index: usize) -> f32 {
        let index = index & self.buffer_mask;
        assume!(unsafe: index < self.buffer.len(), "Index got masked");
        self.buffer[index]
    }

    /// Return a new, empty buffer when holding `required_samples` needs a different capacity
    /// than the current one, else `None`.
    ///
    /// This is the allocating half of [`ensure_capacity`](Self::ensure_capacity). It never
    /// touches `self`, so a failed allocation leaves this buffer usable.
    pub fn resized(&self, required_samples: usize) -> Result<Option<Self>, Error> {
        if Self::capacity_for(required_samples)? == self.capacity() {
            Ok(None)
        } else {
            Self::new(required_samples).map(Some)
        }
    }

    /// Make sure the buffer's capacity is the smallest power of two which holds
    /// `required_samples`. Returns true when the buffer got reallocated.
    ///
    /// Reallocation discards all recorded samples and resets the write cursor to 0. On
    /// allocation errors the buffer keeps its previous state.
    ///
    /// NB: allocates memory, so this must not be called in real-time threads.
    pub fn ensure_capacity(&mut self, required_samples: usize) -> Result<bool, Error> {
        match self.resized(required_samples)? {
            Some(resized) => {
                *self = resized;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for CircularSampleBuffer {
    fn default() -> Self {
        Self {
            buffer: vec![0.0; Self::DEFAULT_CAPACITY],
            buffer_mask: Self::DEFAULT_CAPACITY - 1,
            write_pos: 0,
        }
    }
}

// -------------------------------------------------------------------------------------------------
