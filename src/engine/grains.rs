//! Windowed grain playback from a circular record buffer.

use assume::assume;
use basedrop::Owned;

use crate::utils::{
    buffer::CircularSampleBuffer, interpolation::SampleReader, window::WindowTable,
};

use super::BufferObserver;

// -------------------------------------------------------------------------------------------------

/// Max number of simultaneously playing grains in a [`GrainScheduler`].
pub const MAX_GRAINS: usize = 64;

// -------------------------------------------------------------------------------------------------

/// A single grain voice: a play phase within the grain window and a fixed offset into the
/// record buffer.
#[derive(Debug, Default, Clone, Copy)]
struct Grain {
    phase: usize,
    spread_offset: f64,
}

// -------------------------------------------------------------------------------------------------

/// Plays `grain_count` windowed grains which all read from the same trigger position in a
/// [`CircularSampleBuffer`], each offset by `index * spread * grain_length` samples.
///
/// All grains share one window table. Grain phases advance by one sample per output sample and
/// wrap at the window's length. The summed grain output is normalized by the grain count.
pub struct GrainScheduler {
    grains: [Grain; MAX_GRAINS],
    grain_count: usize,
    spread: f32,
    window: Owned<WindowTable>,
}

impl GrainScheduler {
    /// Create a new scheduler with the given, preallocated grain window.
    /// `grain_count` gets clamped to `[1, MAX_GRAINS]`, `spread` to non negative values.
    pub fn new(window: Owned<WindowTable>, grain_count: usize, spread: f32) -> Self {
        let mut scheduler = Self {
            grains: [Grain::default(); MAX_GRAINS],
            grain_count: grain_count.clamp(1, MAX_GRAINS),
            spread: spread.max(0.0),
            window,
        };
        scheduler.update_spread_offsets();
        scheduler
    }

    /// Number of active grains.
    pub fn grain_count(&self) -> usize {
        self.grain_count
    }

    /// Grain offset factor, relative to the grain length.
    pub fn spread(&self) -> f32 {
        self.spread
    }

    /// Grain length in samples: the window's length.
    pub fn grain_length(&self) -> usize {
        self.window.len()
    }

    /// Current play phases of all active grains.
    pub fn phases(&self) -> impl Iterator<Item = usize> + '_ {
        self.grains[..self.grain_count].iter().map(|g| g.phase)
    }

    /// Change the number of active grains. Restarts all grains.
    pub fn set_grain_count(&mut self, grain_count: usize) {
        self.grain_count = grain_count.clamp(1, MAX_GRAINS);
        self.update_spread_offsets();
        self.reset();
    }

    /// Change the grain spread. Grain phases keep running.
    pub fn set_spread(&mut self, spread: f32) {
        self.spread = spread.max(0.0);
        self.update_spread_offsets();
    }

    /// Replace the grain window, which also changes the grain length. Restarts all grains.
    /// Returns the previous window, so the caller decides where it gets dropped.
    pub fn replace_window(&mut self, window: Owned<WindowTable>) -> Owned<WindowTable> {
        let previous = std::mem::replace(&mut self.window, window);
        self.update_spread_offsets();
        self.reset();
        previous
    }

    /// Restart all grains at phase 0.
    pub fn reset(&mut self) {
        for grain in &mut self.grains {
            grain.phase = 0;
        }
    }

    /// Map a trigger position in range `[-1, 1]` to a normalized buffer position in `[0, 1]`.
    /// Out of range positions are clamped. NaN positions map to the buffer center.
    #[inline]
    pub fn normalize_position(position: f32) -> f64 {
        if position.is_nan() {
            0.5
        } else {
            position.clamp(-1.0, 1.0) as f64 * 0.5 + 0.5
        }
    }

    /// Compute the next output sample for the given trigger position and advance all grains.
    ///
    /// The grain window must not be empty.
    #[inline]
    pub(crate) fn next_sample<R: SampleReader>(
        &mut self,
        buffer: &CircularSampleBuffer,
        position: f32,
    ) -> f32 {
        let grain_length = self.window.len();
        debug_assert!(grain_length > 0, "Grain window must not be empty");

        // absolute positions are calculated in f64 to keep fractions precise in large buffers
        let buffer_offset = Self::normalize_position(position) * buffer.capacity() as f64;
        let window = self.window.values();

        let mut output = 0.0;
        for grain in &mut self.grains[..self.grain_count] {
            let full_index = buffer_offset + grain.phase as f64 + grain.spread_offset;
            let index_floor = full_index.floor();
            let fraction = (full_index - index_floor) as f32;
            let index = index_floor as usize & buffer.mask();

            assume!(unsafe: grain.phase < window.len(), "Grain phases wrap at the window length");
            output += R::read(buffer, index, fraction) * window[grain.phase];

            grain.phase += 1;
            if grain.phase >= grain_length {
                grain.phase = 0;
            }
        }
        output / self.grain_count as f32
    }

    fn update_spread_offsets(&mut self) {
        let grain_offset = self.spread as f64 * self.window.len() as f64;
        for (index, grain) in self.grains.iter_mut().enumerate() {
            grain.spread_offset = index as f64 * grain_offset;
        }
    }
}

impl BufferObserver for GrainScheduler {
    fn buffer_replaced(&mut self, _buffer: &CircularSampleBuffer) {
        self.reset();
    }
}

// -------------------------------------------------------------------------------------------------
