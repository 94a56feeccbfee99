use std::sync::{
    atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use basedrop::{Handle, Owned};
use crossbeam_queue::ArrayQueue;

use crate::{
    error::Error,
    utils::{buffer::CircularSampleBuffer, interpolation::GrainInterpolation, window::WindowTable},
};

use super::{
    options::{EngineMode, BUFFER_DURATION, WINDOW_DURATION},
    state::{EngineEvent, EngineState},
};

// -------------------------------------------------------------------------------------------------

/// Convert a duration in milliseconds into a sample count.
#[inline]
pub(crate) fn duration_to_samples(duration_ms: f32, samples_per_ms: f32) -> usize {
    (duration_ms * samples_per_ms).round().max(0.0) as usize
}

// -------------------------------------------------------------------------------------------------

/// Engine configuration which defines the size of the engine's allocations.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EngineLayout {
    pub mode: EngineMode,
    pub samples_per_ms: f32,
    pub grain_duration_ms: f32,
    pub buffer_duration_ms: f32,
    pub buffer_capacity: usize,
}

// -------------------------------------------------------------------------------------------------

/// Preallocated buffers and windows for a new [`EngineLayout`].
///
/// Built outside of the audio thread, then swapped into the engine without allocating. Replaced
/// allocations get dropped via the engine's collector.
pub(crate) struct Reconfiguration {
    pub samples_per_ms: f32,
    pub buffer_duration_ms: f32,
    pub buffer: Option<Owned<CircularSampleBuffer>>,
    pub grain_window: Option<Owned<WindowTable>>,
    pub loop_window: Option<Owned<WindowTable>>,
}

impl Reconfiguration {
    /// Allocate everything the engine needs to run with the given layout. A new record buffer
    /// only gets created when the required capacity differs from `layout.buffer_capacity`.
    ///
    /// Without a sample rate, buffer durations can't be converted into sample counts: the
    /// record buffer then is kept until the layout gets a sample rate.
    pub fn build(layout: &EngineLayout, collector_handle: &Handle) -> Result<Self, Error> {
        let buffer = if layout.samples_per_ms > 0.0 {
            let required_samples =
                (layout.buffer_duration_ms * layout.samples_per_ms).ceil() as usize;
            if CircularSampleBuffer::capacity_for(required_samples)? != layout.buffer_capacity {
                Some(CircularSampleBuffer::new(required_samples)?)
            } else {
                None
            }
        } else {
            None
        };
        let (grain_window, loop_window) = if layout.mode.is_granular() {
            let grain_length = duration_to_samples(layout.grain_duration_ms, layout.samples_per_ms);
            (Some(WindowTable::new(grain_length)?), None)
        } else if let Some(buffer) = &buffer {
            (None, Some(WindowTable::with_capacity(buffer.capacity())?))
        } else {
            (None, None)
        };
        Ok(Self {
            samples_per_ms: layout.samples_per_ms,
            buffer_duration_ms: layout.buffer_duration_ms,
            buffer: buffer.map(|buffer| Owned::new(collector_handle, buffer)),
            grain_window: grain_window.map(|window| Owned::new(collector_handle, window)),
            loop_window: loop_window.map(|window| Owned::new(collector_handle, window)),
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Messages which get sent from [`EngineHandle`]s to the engine's audio thread.
pub(crate) enum EngineMessage {
    Trigger(EngineEvent),
    SetMix(f32),
    SetSpread(f32),
    SetGrainCount(usize),
    SetInterpolation(GrainInterpolation),
    SetGrainWindow {
        duration_ms: f32,
        window: Owned<WindowTable>,
    },
    ResizeLoop(f32),
    Reconfigure(Reconfiguration),
}

// -------------------------------------------------------------------------------------------------

/// Engine properties which are published by the audio thread for handles.
///
/// `pending` is the layout the engine will have once all queued messages got applied. Handles
/// build their allocations from it, so back to back changes don't get built from a stale
/// layout. Only locked by handles and the engine's allocating control functions, never while
/// processing.
#[derive(Debug, Default)]
pub(crate) struct SharedEngineState {
    samples_per_ms: AtomicU32,
    grain_duration_ms: AtomicU32,
    buffer_duration_ms: AtomicU32,
    buffer_capacity: AtomicUsize,
    state: AtomicU8,
    pending: Mutex<EngineLayout>,
}

impl SharedEngineState {
    pub fn publish(&self, layout: &EngineLayout, state: EngineState) {
        Self::store_f32(&self.samples_per_ms, layout.samples_per_ms);
        Self::store_f32(&self.grain_duration_ms, layout.grain_duration_ms);
        Self::store_f32(&self.buffer_duration_ms, layout.buffer_duration_ms);
        self.buffer_capacity
            .store(layout.buffer_capacity, Ordering::Relaxed);
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn layout(&self, mode: EngineMode) -> EngineLayout {
        EngineLayout {
            mode,
            samples_per_ms: Self::load_f32(&self.samples_per_ms),
            grain_duration_ms: Self::load_f32(&self.grain_duration_ms),
            buffer_duration_ms: Self::load_f32(&self.buffer_duration_ms),
            buffer_capacity: self.buffer_capacity.load(Ordering::Relaxed),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_repr(self.state.load(Ordering::Relaxed))
    }

    pub fn pending_layout(&self) -> MutexGuard<'_, EngineLayout> {
        // layouts are plain values: a panicking holder can't leave them half updated
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_pending_layout(&self, layout: EngineLayout) {
        *self.pending_layout() = layout;
    }

    fn store_f32(atomic: &AtomicU32, value: f32) {
        atomic.store(value.to_bits(), Ordering::Relaxed);
    }

    fn load_f32(atomic: &AtomicU32) -> f32 {
        f32::from_bits(atomic.load(Ordering::Relaxed))
    }
}

// -------------------------------------------------------------------------------------------------

/// Controls a [`GranularEngine`](crate::GranularEngine) from other threads.
///
/// All changes are queued and applied by the engine at the start of its next processed block.
/// Allocations which are needed to apply a change, like grain windows or record buffers, are
/// created by the handle, so the engine's audio thread never allocates.
///
/// Handles are `Send` and `Sync` so they can be sent across threads.
#[derive(Clone)]
pub struct EngineHandle {
    mode: EngineMode,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    shared_state: Arc<SharedEngineState>,
    collector_handle: Handle,
}

impl EngineHandle {
    pub(crate) fn new(
        mode: EngineMode,
        message_queue: Arc<ArrayQueue<EngineMessage>>,
        shared_state: Arc<SharedEngineState>,
        collector_handle: Handle,
    ) -> Self {
        Self {
            mode,
            message_queue,
            shared_state,
            collector_handle,
        }
    }

    /// The controlled engine's variant.
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// The engine's state, as of the last processed block.
    pub fn state(&self) -> EngineState {
        self.shared_state.state()
    }

    /// The engine's record buffer capacity, as of the last processed block.
    pub fn buffer_capacity(&self) -> usize {
        self.shared_state.layout(self.mode).buffer_capacity
    }

    /// Send a record, play, toggle or idle event.
    pub fn trigger(&self, event: EngineEvent) -> Result<(), Error> {
        self.send(EngineMessage::Trigger(event), "trigger")
    }

    /// Start recording.
    pub fn record(&self) -> Result<(), Error> {
        self.trigger(EngineEvent::Record)
    }

    /// Start playback.
    pub fn play(&self) -> Result<(), Error> {
        self.trigger(EngineEvent::Play)
    }

    /// Switch between recording and playback.
    pub fn toggle(&self) -> Result<(), Error> {
        self.trigger(EngineEvent::Toggle)
    }

    /// Stop recording and playback.
    pub fn idle(&self) -> Result<(), Error> {
        self.trigger(EngineEvent::Idle)
    }

    /// Set the wet/dry mix. Clamped to `[0, 1]` by the engine.
    pub fn set_mix(&self, mix: f32) -> Result<(), Error> {
        self.send(EngineMessage::SetMix(mix), "set_mix")
    }

    /// Set the grain spread of multi grain engines.
    pub fn set_spread(&self, spread: f32) -> Result<(), Error> {
        self.send(EngineMessage::SetSpread(spread), "set_spread")
    }

    /// Set the grain count of multi grain engines.
    pub fn set_grain_count(&self, grain_count: usize) -> Result<(), Error> {
        self.send(EngineMessage::SetGrainCount(grain_count), "set_grain_count")
    }

    /// Set the fractional grain readback mode.
    pub fn set_interpolation(&self, interpolation: GrainInterpolation) -> Result<(), Error> {
        self.send(
            EngineMessage::SetInterpolation(interpolation),
            "set_interpolation",
        )
    }

    /// Change the grain duration, or re-delimit the captured loop of loop engines.
    ///
    /// Grain windows are built for the sample rate of the last queued sample rate change.
    pub fn resize(&self, duration_ms: f32) -> Result<(), Error> {
        let duration_ms = WINDOW_DURATION.clamp_value(duration_ms);
        let mut pending = self.shared_state.pending_layout();
        if self.mode.is_granular() {
            let grain_length = duration_to_samples(duration_ms, pending.samples_per_ms);
            let window = WindowTable::new(grain_length)?;
            let window = Owned::new(&self.collector_handle, window);
            self.send(
                EngineMessage::SetGrainWindow {
                    duration_ms,
                    window,
                },
                "resize",
            )?;
        } else {
            self.send(EngineMessage::ResizeLoop(duration_ms), "resize")?;
        }
        pending.grain_duration_ms = duration_ms;
        Ok(())
    }

    /// Apply a new sample rate. Allocates a new record buffer and windows when needed.
    pub fn set_sample_rate(&self, sample_rate: u32) -> Result<(), Error> {
        self.reconfigure(
            |layout| layout.samples_per_ms = sample_rate as f32 / 1000.0,
            "set_sample_rate",
        )
    }

    /// Change the minimum record buffer duration. Allocates a new record buffer when needed.
    pub fn set_buffer_duration(&self, buffer_duration_ms: f32) -> Result<(), Error> {
        let buffer_duration_ms = BUFFER_DURATION.clamp_value(buffer_duration_ms);
        self.reconfigure(
            |layout| layout.buffer_duration_ms = buffer_duration_ms,
            "set_buffer_duration",
        )
    }

    /// Build and queue a reconfiguration for the pending layout with the given change applied.
    /// The pending layout only gets updated when the reconfiguration got queued.
    fn reconfigure<F: FnOnce(&mut EngineLayout)>(
        &self,
        change: F,
        event_name: &str,
    ) -> Result<(), Error> {
        let mut pending = self.shared_state.pending_layout();
        let mut layout = *pending;
        change(&mut layout);
        let reconfiguration = Reconfiguration::build(&layout, &self.collector_handle)?;
        if let Some(buffer) = &reconfiguration.buffer {
            layout.buffer_capacity = buffer.capacity();
        }
        self.send(EngineMessage::Reconfigure(reconfiguration), event_name)?;
        *pending = layout;
        Ok(())
    }

    fn send(&self, message: EngineMessage, event_name: &str) -> Result<(), Error> {
        if self.message_queue.push(message).is_err() {
            log::warn!("Engine's message queue is full. Failed to send a {event_name} event.");
            Err(Error::SendError("Engine queue is full".to_string()))
        } else {
            Ok(())
        }
    }
}

// -------------------------------------------------------------------------------------------------
