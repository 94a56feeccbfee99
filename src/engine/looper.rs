//! Loop capture and windowed loop playback.

use basedrop::Owned;

use crate::utils::{buffer::CircularSampleBuffer, window::WindowTable};

use super::{state::EngineState, state::Transition, BufferObserver};

// -------------------------------------------------------------------------------------------------

/// A delimited region of the record buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSpan {
    /// Buffer position where the loop starts.
    pub start: usize,
    /// Loop length in samples.
    pub length: usize,
}

// -------------------------------------------------------------------------------------------------

/// Captures a loop from the engine's rolling record buffer and plays it back, faded in and out
/// with a Hann window of the loop's length.
///
/// Entering the recording state marks the loop start at the buffer's write cursor. Entering the
/// playing state from recording closes the loop at the write cursor. The loop window gets
/// regenerated in place, so its capacity must cover the record buffer's capacity.
pub struct LoopCapture {
    span: LoopSpan,
    play_phase: usize,
    read_pos: usize,
    window: Owned<WindowTable>,
}

impl LoopCapture {
    /// Create a new, empty loop capture with a preallocated loop window.
    pub fn new(window: Owned<WindowTable>) -> Self {
        Self {
            span: LoopSpan::default(),
            play_phase: 0,
            read_pos: 0,
            window,
        }
    }

    /// The currently captured loop.
    pub fn span(&self) -> LoopSpan {
        self.span
    }

    /// Playback phase within the loop.
    pub fn play_phase(&self) -> usize {
        self.play_phase
    }

    /// Access to the loop's fade window.
    pub fn window(&self) -> &WindowTable {
        &self.window
    }

    /// Apply loop related side effects of a state transition. Returns the new span when the
    /// transition closed a loop.
    pub fn apply_transition(
        &mut self,
        transition: Transition,
        buffer: &CircularSampleBuffer,
    ) -> Option<LoopSpan> {
        if transition.enters(EngineState::Recording) {
            self.open(buffer);
            None
        } else if transition.enters(EngineState::Playing) {
            if transition.from == EngineState::Recording {
                Some(self.close(buffer))
            } else {
                self.rewind();
                None
            }
        } else {
            None
        }
    }

    /// Start a new, empty loop at the buffer's write cursor.
    pub fn open(&mut self, buffer: &CircularSampleBuffer) {
        self.span = LoopSpan {
            start: buffer.write_pos(),
            length: 0,
        };
        self.window.generate(0);
        self.rewind();
    }

    /// Close the loop at the buffer's write cursor and restart playback at the loop start.
    pub fn close(&mut self, buffer: &CircularSampleBuffer) -> LoopSpan {
        let length = buffer.distance(self.span.start, buffer.write_pos());
        self.set_length(length);
        self.span
    }

    /// Re-delimit the loop to `length` samples from its current start. Lengths are limited to
    /// the buffer's capacity - 1. Restarts playback at the loop start.
    pub fn resize(&mut self, length: usize, buffer: &CircularSampleBuffer) -> LoopSpan {
        self.set_length(length.min(buffer.mask()));
        self.span
    }

    /// Restart playback at the loop start.
    pub fn rewind(&mut self) {
        self.play_phase = 0;
        self.read_pos = self.span.start;
    }

    /// Replace the loop window with a new, empty one, e.g. after the record buffer got resized.
    /// Returns the previous window.
    pub fn replace_window(&mut self, window: Owned<WindowTable>) -> Owned<WindowTable> {
        let previous = std::mem::replace(&mut self.window, window);
        let length = self.span.length.min(self.window.capacity());
        self.window.generate(length);
        previous
    }

    /// Read the next loop sample and advance the playback position.
    ///
    /// The captured loop must be at least one sample long.
    #[inline]
    pub fn next_sample(&mut self, buffer: &CircularSampleBuffer) -> f32 {
        debug_assert!(self.span.length > 0, "Loop must not be empty");
        debug_assert!(self.window.len() == self.span.length);

        let output = buffer.read_at(self.read_pos) * self.window.value(self.play_phase);

        self.play_phase += 1;
        if self.play_phase >= self.span.length {
            self.play_phase = 0;
            self.read_pos = self.span.start;
        } else {
            self.read_pos = (self.read_pos + 1) & buffer.mask();
        }
        output
    }

    fn set_length(&mut self, length: usize) {
        debug_assert!(
            length <= self.window.capacity(),
            "Loop window must be preallocated"
        );
        self.span.length = length;
        self.window.generate(length);
        self.rewind();
    }
}

impl BufferObserver for LoopCapture {
    fn buffer_replaced(&mut self, buffer: &CircularSampleBuffer) {
        self.span = LoopSpan {
            start: buffer.write_pos(),
            length: 0,
        };
        self.window.generate(0);
        self.rewind();
    }
}

// -------------------------------------------------------------------------------------------------
