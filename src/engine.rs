//! Real-time granular record and playback engine.

use std::sync::{mpsc::SyncSender, Arc};

use basedrop::{Handle, Owned};
use crossbeam_queue::ArrayQueue;

use crate::{
    error::Error,
    parameter::Parameter,
    utils::{
        buffer::CircularSampleBuffer,
        interpolation::{CubicReader, GrainInterpolation, NearestReader, SampleReader},
        window::WindowTable,
    },
};

// -------------------------------------------------------------------------------------------------

mod grains;
mod handle;
mod looper;
mod options;
mod state;

pub use grains::{GrainScheduler, MAX_GRAINS};
pub use handle::EngineHandle;
pub use looper::{LoopCapture, LoopSpan};
pub use options::{
    EngineMode, EngineOptions, BUFFER_DURATION, GRAIN_COUNT, MIX, SPREAD, WINDOW_DURATION,
};
pub use state::{EngineEvent, EngineState, Transition};

use handle::{
    duration_to_samples, EngineLayout, EngineMessage, Reconfiguration, SharedEngineState,
};

// -------------------------------------------------------------------------------------------------

/// Callback for engine parts which refer to positions in the engine's record buffer.
///
/// Called after the record buffer got replaced: recorded audio and buffer positions are lost.
pub(crate) trait BufferObserver {
    fn buffer_replaced(&mut self, buffer: &CircularSampleBuffer);
}

// -------------------------------------------------------------------------------------------------

/// Events which get sent from a [`GranularEngine`] to an optional status channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineStatusEvent {
    /// The engine's record/playback state changed.
    StateChanged { from: EngineState, to: EngineState },
    /// The record buffer got reallocated. Recorded audio got discarded.
    BufferResized { capacity: usize },
    /// The grain window got replaced.
    WindowResized { samples: usize },
    /// A loop got captured or re-delimited.
    LoopCaptured { span: LoopSpan },
}

// -------------------------------------------------------------------------------------------------

/// Mode specific playback state.
enum Scheduler {
    Grains(GrainScheduler),
    Loop(LoopCapture),
}

impl BufferObserver for Scheduler {
    fn buffer_replaced(&mut self, buffer: &CircularSampleBuffer) {
        match self {
            Scheduler::Grains(grains) => grains.buffer_replaced(buffer),
            Scheduler::Loop(looper) => looper.buffer_replaced(buffer),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Records a mono input signal into a circular buffer and plays it back, either as windowed
/// grains at externally driven trigger positions or as a captured, windowed loop.
///
/// The engine is driven by a single audio thread via [`process`](Self::process). Control changes
/// can be applied directly between blocks, or from other threads via an [`EngineHandle`], which
/// queues changes for the next processed block.
///
/// Allocations are dropped via the `basedrop` collector whose handle got passed on creation, so
/// the collector's owner must `collect` regularly outside of the audio thread.
pub struct GranularEngine {
    mode: EngineMode,
    state: EngineState,
    samples_per_ms: f32,
    grain_duration_ms: f32,
    buffer_duration_ms: f32,
    mix: f32,
    interpolation: GrainInterpolation,
    buffer: Owned<CircularSampleBuffer>,
    scheduler: Scheduler,
    message_queue: Arc<ArrayQueue<EngineMessage>>,
    shared_state: Arc<SharedEngineState>,
    status_sender: Option<SyncSender<EngineStatusEvent>>,
    collector_handle: Handle,
}

impl GranularEngine {
    const MESSAGE_QUEUE_SIZE: usize = 128;

    /// Create a new engine with the given options. Numeric options get clamped to their valid
    /// ranges. The engine starts idle and has no sample rate: call [`prepare`](Self::prepare)
    /// before processing.
    pub fn new(options: EngineOptions, collector_handle: &Handle) -> Result<Self, Error> {
        options.validate()?;
        let options = options.clamped();

        let buffer = CircularSampleBuffer::new(CircularSampleBuffer::DEFAULT_CAPACITY)?;
        let scheduler = if options.mode.is_granular() {
            Scheduler::Grains(GrainScheduler::new(
                Owned::new(collector_handle, WindowTable::default()),
                options.grain_count,
                options.spread,
            ))
        } else {
            let window = WindowTable::with_capacity(buffer.capacity())?;
            Scheduler::Loop(LoopCapture::new(Owned::new(collector_handle, window)))
        };

        let engine = Self {
            mode: options.mode,
            state: EngineState::Idle,
            samples_per_ms: 0.0,
            grain_duration_ms: options.grain_duration_ms,
            buffer_duration_ms: options.buffer_duration_ms,
            mix: options.mix,
            interpolation: options.interpolation,
            buffer: Owned::new(collector_handle, buffer),
            scheduler,
            message_queue: Arc::new(ArrayQueue::new(Self::MESSAGE_QUEUE_SIZE)),
            shared_state: Arc::new(SharedEngineState::default()),
            status_sender: None,
            collector_handle: collector_handle.clone(),
        };
        engine.publish_state();
        engine.shared_state.set_pending_layout(engine.layout());
        log::debug!("Created a new {} engine", engine.mode);
        Ok(engine)
    }

    /// Create a handle to control the engine from other threads.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(
            self.mode,
            Arc::clone(&self.message_queue),
            Arc::clone(&self.shared_state),
            self.collector_handle.clone(),
        )
    }

    /// Optional channel which receives [`EngineStatusEvent`]s.
    pub fn status_sender(&self) -> Option<SyncSender<EngineStatusEvent>> {
        self.status_sender.clone()
    }

    /// Set or remove the status event channel.
    pub fn set_status_sender(&mut self, sender: Option<SyncSender<EngineStatusEvent>>) {
        self.status_sender = sender;
    }

    /// Descriptors of the engine's control values.
    pub fn parameters(&self) -> Vec<Box<dyn Parameter>> {
        self.mode.parameters()
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    pub fn interpolation(&self) -> GrainInterpolation {
        self.interpolation
    }

    /// Current sample rate in samples per millisecond. 0 until the engine got prepared.
    pub fn samples_per_ms(&self) -> f32 {
        self.samples_per_ms
    }

    /// Grain duration, or the duration of the last loop resize, in milliseconds.
    pub fn grain_duration_ms(&self) -> f32 {
        self.grain_duration_ms
    }

    /// Requested minimum record buffer duration in milliseconds.
    pub fn buffer_duration_ms(&self) -> f32 {
        self.buffer_duration_ms
    }

    /// Actual record buffer capacity in samples.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Grain spread. Always 0 for single grain and loop engines.
    pub fn spread(&self) -> f32 {
        match &self.scheduler {
            Scheduler::Grains(grains) => grains.spread(),
            Scheduler::Loop(_) => 0.0,
        }
    }

    /// Number of grains. Always 1 for single grain and loop engines.
    pub fn grain_count(&self) -> usize {
        match &self.scheduler {
            Scheduler::Grains(grains) => grains.grain_count(),
            Scheduler::Loop(_) => 1,
        }
    }

    /// Length of the grain or loop window in samples.
    pub fn window_length(&self) -> usize {
        match &self.scheduler {
            Scheduler::Grains(grains) => grains.grain_length(),
            Scheduler::Loop(looper) => looper.window().len(),
        }
    }

    /// The captured loop of loop engines.
    pub fn loop_span(&self) -> Option<LoopSpan> {
        match &self.scheduler {
            Scheduler::Grains(_) => None,
            Scheduler::Loop(looper) => Some(looper.span()),
        }
    }

    /// Apply a new sample rate: resizes the record buffer and regenerates windows as needed.
    /// Growing the record buffer discards all recorded audio.
    ///
    /// NB: allocates memory, so this must not be called in real-time threads. Use
    /// [`EngineHandle::set_sample_rate`] instead. On errors the engine keeps its previous state.
    pub fn prepare(&mut self, sample_rate: u32) -> Result<(), Error> {
        let layout = EngineLayout {
            samples_per_ms: sample_rate as f32 / 1000.0,
            ..self.layout()
        };
        self.reconfigure(layout)
    }

    /// Change the minimum record buffer duration. Durations are clamped to 1ms or more.
    ///
    /// NB: allocates memory, so this must not be called in real-time threads.
    pub fn set_buffer_duration(&mut self, buffer_duration_ms: f32) -> Result<(), Error> {
        let layout = EngineLayout {
            buffer_duration_ms: BUFFER_DURATION.clamp_value(buffer_duration_ms),
            ..self.layout()
        };
        self.reconfigure(layout)
    }

    /// Grain engines: change the grain duration and restart all grains.
    /// Loop engines: re-delimit the captured loop to the given duration from its start.
    ///
    /// Durations are clamped to 10ms or more.
    ///
    /// NB: grain engines allocate a new window, so this must not be called in real-time threads.
    pub fn resize(&mut self, duration_ms: f32) -> Result<(), Error> {
        let duration_ms = WINDOW_DURATION.clamp_value(duration_ms);
        if self.mode.is_granular() {
            let grain_length = duration_to_samples(duration_ms, self.samples_per_ms);
            let window = WindowTable::new(grain_length).inspect_err(|err| {
                log::warn!("Failed to allocate a grain window of {grain_length} samples: {err}");
            })?;
            let window = Owned::new(&self.collector_handle, window);
            self.apply_grain_window(duration_ms, window);
            self.shared_state.pending_layout().grain_duration_ms = duration_ms;
            log::debug!("Grain length: {grain_length} samples");
        } else {
            self.apply_loop_resize(duration_ms);
        }
        Ok(())
    }

    /// Send a record, play, toggle or idle event.
    pub fn trigger(&mut self, event: EngineEvent) {
        let transition = self.state.transition(event);
        let captured = match &mut self.scheduler {
            Scheduler::Loop(looper) => looper.apply_transition(transition, &self.buffer),
            Scheduler::Grains(_) => None,
        };
        if transition.is_change() {
            self.state = transition.to;
            self.publish_state();
            self.send_status(EngineStatusEvent::StateChanged {
                from: transition.from,
                to: transition.to,
            });
        }
        if let Some(span) = captured {
            self.send_status(EngineStatusEvent::LoopCaptured { span });
        }
    }

    /// Start recording. Loop engines start a new loop at the current write position.
    pub fn record(&mut self) {
        self.trigger(EngineEvent::Record);
    }

    /// Start playback. Loop engines close a recording loop, or replay the last captured loop.
    pub fn play(&mut self) {
        self.trigger(EngineEvent::Play);
    }

    /// Switch from recording to playback, or start recording from any other state.
    pub fn toggle(&mut self) {
        self.trigger(EngineEvent::Toggle);
    }

    /// Stop recording and playback.
    pub fn idle(&mut self) {
        self.trigger(EngineEvent::Idle);
    }

    /// Set the wet/dry mix. Clamped to `[0, 1]`.
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = MIX.clamp_value(mix);
    }

    /// Set the grain spread. Only applies to multi grain engines. Grains keep playing.
    pub fn set_spread(&mut self, spread: f32) {
        if let (EngineMode::MultiGrain, Scheduler::Grains(grains)) =
            (self.mode, &mut self.scheduler)
        {
            grains.set_spread(SPREAD.clamp_value(spread));
        }
    }

    /// Set the grain count. Only applies to multi grain engines. Restarts all grains.
    pub fn set_grain_count(&mut self, grain_count: usize) {
        if let (EngineMode::MultiGrain, Scheduler::Grains(grains)) =
            (self.mode, &mut self.scheduler)
        {
            grains.set_grain_count(GRAIN_COUNT.clamp_count(grain_count));
        }
    }

    /// Set the fractional grain readback mode.
    pub fn set_interpolation(&mut self, interpolation: GrainInterpolation) {
        self.interpolation = interpolation;
    }

    /// Process a block of mono audio.
    ///
    /// Processes `min(input.len(), output.len())` samples. Output samples beyond the input's
    /// length are silenced. `positions` holds one grain trigger position in range `[-1, 1]` per
    /// sample. Missing or NaN positions are read as 0, which addresses the middle of the record
    /// buffer. Loop engines ignore positions.
    ///
    /// Applies all pending handle messages first. Never allocates or blocks.
    pub fn process(&mut self, input: &[f32], positions: &[f32], output: &mut [f32]) {
        self.process_messages();
        Self::assert_no_alloc(|| self.process_block(input, positions, output));
        if let Some(tail) = output.get_mut(input.len()..) {
            tail.fill(0.0);
        }
    }

    fn process_messages(&mut self) {
        while let Some(message) = self.message_queue.pop() {
            match message {
                EngineMessage::Trigger(event) => self.trigger(event),
                EngineMessage::SetMix(mix) => self.set_mix(mix),
                EngineMessage::SetSpread(spread) => self.set_spread(spread),
                EngineMessage::SetGrainCount(count) => self.set_grain_count(count),
                EngineMessage::SetInterpolation(interpolation) => {
                    self.set_interpolation(interpolation)
                }
                EngineMessage::SetGrainWindow {
                    duration_ms,
                    window,
                } => self.apply_grain_window(duration_ms, window),
                EngineMessage::ResizeLoop(duration_ms) => self.apply_loop_resize(duration_ms),
                EngineMessage::Reconfigure(reconfiguration) => {
                    self.apply_reconfiguration(reconfiguration)
                }
            }
        }
    }

    fn process_block(&mut self, input: &[f32], positions: &[f32], output: &mut [f32]) {
        let mix = self.mix;
        let buffer = &mut *self.buffer;
        match (&mut self.scheduler, self.state) {
            (Scheduler::Grains(_), EngineState::Idle) => {
                Self::process_dry(input, output, mix);
            }
            (Scheduler::Grains(grains), state) if grains.grain_length() == 0 => {
                // not prepared yet
                if state == EngineState::Recording {
                    Self::record_dry(buffer, input, output, mix);
                } else {
                    Self::process_dry(input, output, mix);
                }
            }
            (Scheduler::Grains(grains), state) => {
                let recording = state == EngineState::Recording;
                match (self.interpolation, recording) {
                    (GrainInterpolation::Cubic, true) => Self::process_grains::<CubicReader, true>(
                        grains, buffer, input, positions, output, mix,
                    ),
                    (GrainInterpolation::Cubic, false) => {
                        Self::process_grains::<CubicReader, false>(
                            grains, buffer, input, positions, output, mix,
                        )
                    }
                    (GrainInterpolation::Nearest, true) => {
                        Self::process_grains::<NearestReader, true>(
                            grains, buffer, input, positions, output, mix,
                        )
                    }
                    (GrainInterpolation::Nearest, false) => {
                        Self::process_grains::<NearestReader, false>(
                            grains, buffer, input, positions, output, mix,
                        )
                    }
                }
            }
            (Scheduler::Loop(_), EngineState::Idle) => {
                Self::record_dry(buffer, input, output, mix);
            }
            (Scheduler::Loop(_), EngineState::Recording) => {
                // monitor the input while recording
                for (output, input) in output.iter_mut().zip(input) {
                    buffer.write(*input);
                    *output = Self::mix_samples(*input, *input, mix);
                }
            }
            (Scheduler::Loop(looper), EngineState::Playing) => {
                if looper.span().length == 0 {
                    Self::process_dry(input, output, mix);
                } else {
                    for (output, input) in output.iter_mut().zip(input) {
                        let wet = looper.next_sample(buffer);
                        *output = Self::mix_samples(wet, *input, mix);
                    }
                }
            }
        }
    }

    fn process_grains<R: SampleReader, const RECORD: bool>(
        grains: &mut GrainScheduler,
        buffer: &mut CircularSampleBuffer,
        input: &[f32],
        positions: &[f32],
        output: &mut [f32],
        mix: f32,
    ) {
        let positions = positions.iter().copied().chain(std::iter::repeat(0.0));
        for ((output, input), position) in output.iter_mut().zip(input).zip(positions) {
            if RECORD {
                buffer.write(*input);
            }
            let wet = grains.next_sample::<R>(buffer, position);
            *output = Self::mix_samples(wet, *input, mix);
        }
    }

    fn process_dry(input: &[f32], output: &mut [f32], mix: f32) {
        for (output, input) in output.iter_mut().zip(input) {
            *output = Self::mix_samples(0.0, *input, mix);
        }
    }

    fn record_dry(buffer: &mut CircularSampleBuffer, input: &[f32], output: &mut [f32], mix: f32) {
        for (output, input) in output.iter_mut().zip(input) {
            buffer.write(*input);
            *output = Self::mix_samples(0.0, *input, mix);
        }
    }

    #[inline(always)]
    fn mix_samples(wet: f32, dry: f32, mix: f32) -> f32 {
        wet * mix + dry * (1.0 - mix)
    }

    fn apply_grain_window(&mut self, duration_ms: f32, window: Owned<WindowTable>) {
        if let Scheduler::Grains(grains) = &mut self.scheduler {
            self.grain_duration_ms = duration_ms;
            // the previous window gets dropped via the collector
            let _ = grains.replace_window(window);
            let samples = grains.grain_length();
            self.publish_state();
            self.send_status(EngineStatusEvent::WindowResized { samples });
        }
    }

    fn apply_loop_resize(&mut self, duration_ms: f32) {
        if let Scheduler::Loop(looper) = &mut self.scheduler {
            self.grain_duration_ms = duration_ms;
            let length = duration_to_samples(duration_ms, self.samples_per_ms);
            let span = looper.resize(length, &self.buffer);
            self.publish_state();
            self.send_status(EngineStatusEvent::LoopCaptured { span });
        }
    }

    fn apply_reconfiguration(&mut self, reconfiguration: Reconfiguration) {
        let Reconfiguration {
            samples_per_ms,
            buffer_duration_ms,
            buffer,
            grain_window,
            loop_window,
        } = reconfiguration;

        self.samples_per_ms = samples_per_ms;
        self.buffer_duration_ms = buffer_duration_ms;
        if let Some(buffer) = buffer {
            self.buffer = buffer;
            self.scheduler.buffer_replaced(&self.buffer);
            let capacity = self.buffer.capacity();
            self.send_status(EngineStatusEvent::BufferResized { capacity });
        }
        match (&mut self.scheduler, grain_window, loop_window) {
            (Scheduler::Grains(grains), Some(window), _) => {
                let _ = grains.replace_window(window);
                let samples = grains.grain_length();
                self.send_status(EngineStatusEvent::WindowResized { samples });
            }
            (Scheduler::Loop(looper), _, Some(window)) => {
                let _ = looper.replace_window(window);
            }
            _ => (),
        }
        self.publish_state();
    }

    fn reconfigure(&mut self, layout: EngineLayout) -> Result<(), Error> {
        let reconfiguration = Reconfiguration::build(&layout, &self.collector_handle)
            .inspect_err(|err| {
                log::warn!(
                    "Failed to allocate engine buffers for {} ms at {} samples/ms: {err}",
                    layout.buffer_duration_ms,
                    layout.samples_per_ms
                );
            })?;
        self.apply_reconfiguration(reconfiguration);
        self.shared_state.set_pending_layout(self.layout());
        log::debug!(
            "Engine buffer capacity: {} samples, window length: {} samples",
            self.buffer_capacity(),
            self.window_length()
        );
        Ok(())
    }

    fn layout(&self) -> EngineLayout {
        EngineLayout {
            mode: self.mode,
            samples_per_ms: self.samples_per_ms,
            grain_duration_ms: self.grain_duration_ms,
            buffer_duration_ms: self.buffer_duration_ms,
            buffer_capacity: self.buffer.capacity(),
        }
    }

    fn publish_state(&self) {
        self.shared_state.publish(&self.layout(), self.state);
    }

    fn send_status(&self, event: EngineStatusEvent) {
        if let Some(sender) = &self.status_sender {
            // NB: try_send: status events may get lost, but we never want to block here
            if let Err(err) = sender.try_send(event) {
                log::warn!("Failed to send engine status event: {err}");
            }
        }
    }

    #[inline]
    fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::assert_no_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::mpsc::sync_channel;

    use basedrop::Collector;

    use super::*;

    const BLOCK_SIZE: usize = 64;

    fn sine(len: usize, period: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / period as f32).sin())
            .collect()
    }

    fn process_all(
        engine: &mut GranularEngine,
        input: &[f32],
        positions: &[f32],
        output: &mut [f32],
    ) {
        for (block, (input, output)) in input
            .chunks(BLOCK_SIZE)
            .zip(output.chunks_mut(BLOCK_SIZE))
            .enumerate()
        {
            let offset = block * BLOCK_SIZE;
            let positions = positions.get(offset..).unwrap_or(&[]);
            engine.process(input, positions, output);
        }
    }

    #[test]
    fn prepare_sizes_buffer_and_window() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine = GranularEngine::new(
            EngineOptions::multi_grain(100.0, 4),
            &collector.handle(),
        )?;
        assert_eq!(engine.window_length(), 0);
        engine.prepare(48000)?;
        assert_eq!(engine.samples_per_ms(), 48.0);
        assert_eq!(engine.buffer_capacity(), 262_144);
        assert_eq!(engine.window_length(), 4800);

        engine.resize(20.0)?;
        assert_eq!(engine.window_length(), 960);
        engine.resize(1.0)?;
        assert_eq!(engine.grain_duration_ms(), 10.0);
        assert_eq!(engine.window_length(), 480);

        engine.set_buffer_duration(100.0)?;
        assert_eq!(engine.buffer_capacity(), 8192);
        Ok(())
    }

    #[test]
    fn failed_reconfiguration_keeps_state() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::looper(1000.0), &collector.handle())?;
        engine.prepare(44100)?;
        let capacity = engine.buffer_capacity();
        assert!(engine.set_buffer_duration(f32::MAX).is_err());
        assert_eq!(engine.buffer_capacity(), capacity);
        assert_eq!(engine.buffer_duration_ms(), 1000.0);
        Ok(())
    }

    #[test]
    fn mix_extremes() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine = GranularEngine::new(
            EngineOptions::multi_grain(20.0, 3).mix(0.0),
            &collector.handle(),
        )?;
        engine.prepare(8000)?;
        let input = sine(4096, 37);
        // address the recorded part of the buffer
        let positions = vec![-0.95; input.len()];
        let mut output = vec![0.0; input.len()];

        engine.record();
        process_all(&mut engine, &input, &positions, &mut output);
        assert_eq!(output, input);

        engine.play();
        process_all(&mut engine, &input, &positions, &mut output);
        assert_eq!(output, input);

        // wet only: independent of the input while playing
        engine.set_mix(1.0);
        let constant = vec![0.5; input.len()];
        let mut wet = vec![0.0; input.len()];
        process_all(&mut engine, &constant, &positions, &mut wet);
        assert!(wet.iter().any(|v| v.abs() > 0.01));
        Ok(())
    }

    #[test]
    fn idle_grains_are_silent() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::multi_grain(20.0, 2), &collector.handle())?;
        engine.prepare(8000)?;
        engine.set_mix(1.0);
        let input = sine(1024, 20);
        let mut output = vec![1.0; input.len()];
        process_all(&mut engine, &input, &[], &mut output);
        assert!(output.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn single_grain_matches_one_multi_grain() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let handle = collector.handle();
        let mut single = GranularEngine::new(EngineOptions::single_grain(30.0).mix(0.7), &handle)?;
        let mut multi = GranularEngine::new(
            EngineOptions::multi_grain(30.0, 1).spread(0.0).mix(0.7),
            &handle,
        )?;
        single.prepare(8000)?;
        multi.prepare(8000)?;

        let input = sine(8192, 101);
        let positions = (0..input.len())
            .map(|i| (i as f32 / 4096.0) - 1.0)
            .collect::<Vec<_>>();
        let mut single_output = vec![0.0; input.len()];
        let mut multi_output = vec![0.0; input.len()];
        for engine in [&mut single, &mut multi] {
            engine.record();
        }
        process_all(&mut single, &input, &positions, &mut single_output);
        process_all(&mut multi, &input, &positions, &mut multi_output);
        assert_eq!(single_output, multi_output);

        for engine in [&mut single, &mut multi] {
            engine.play();
        }
        process_all(&mut single, &input, &positions, &mut single_output);
        process_all(&mut multi, &input, &positions, &mut multi_output);
        assert_eq!(single_output, multi_output);

        // spread and grain count don't apply to single grain engines
        single.set_spread(0.5);
        single.set_grain_count(8);
        assert_eq!(single.spread(), 0.0);
        assert_eq!(single.grain_count(), 1);
        Ok(())
    }

    #[test]
    fn loop_capture_and_playback() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::looper(100.0), &collector.handle())?;
        engine.prepare(1000)?;
        assert_eq!(engine.buffer_capacity(), 128);

        let (sender, receiver) = sync_channel(16);
        engine.set_status_sender(Some(sender));

        // record 40 samples
        engine.toggle();
        let input = (1..=40).map(|i| i as f32).collect::<Vec<_>>();
        let mut output = vec![0.0; input.len()];
        engine.process(&input, &[], &mut output);
        assert_eq!(output, input);

        engine.toggle();
        assert_eq!(engine.state(), EngineState::Playing);
        assert_eq!(
            engine.loop_span(),
            Some(LoopSpan {
                start: 0,
                length: 40
            })
        );

        let window = WindowTable::new(40)?;
        let silence = vec![0.0; 120];
        let mut output = vec![0.0; silence.len()];
        engine.process(&silence, &[], &mut output);
        for (i, value) in output.iter().enumerate() {
            let expected = input[i % 40] * window.value(i % 40);
            assert!((value - expected).abs() < 1e-4, "{value} != {expected}");
        }
        assert!(output[0].abs() < 1e-6 && output[39].abs() < 1e-4);

        let events = receiver.try_iter().collect::<Vec<_>>();
        assert_eq!(
            events,
            vec![
                EngineStatusEvent::StateChanged {
                    from: EngineState::Idle,
                    to: EngineState::Recording
                },
                EngineStatusEvent::StateChanged {
                    from: EngineState::Recording,
                    to: EngineState::Playing
                },
                EngineStatusEvent::LoopCaptured {
                    span: LoopSpan {
                        start: 0,
                        length: 40
                    }
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn idle_looper_keeps_recording() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::looper(100.0), &collector.handle())?;
        engine.prepare(1000)?;
        let input = vec![0.25; 10];
        let mut output = vec![1.0; input.len()];
        engine.process(&input, &[], &mut output);
        // mix defaults to wet only: idle loopers are silent
        assert!(output.iter().all(|v| *v == 0.0));

        // the next loop starts at the rolling write position
        engine.record();
        engine.process(&input, &[], &mut output);
        engine.play();
        assert_eq!(
            engine.loop_span(),
            Some(LoopSpan {
                start: 10,
                length: 10
            })
        );

        // resize re-delimits the loop from its start
        engine.resize(50.0)?;
        assert_eq!(engine.loop_span().map(|span| span.length), Some(50));
        engine.resize(10_000.0)?;
        assert_eq!(engine.loop_span().map(|span| span.length), Some(127));
        Ok(())
    }

    #[test]
    fn handle_messages() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::multi_grain(50.0, 2), &collector.handle())?;
        let handle = engine.handle();
        assert_eq!(handle.mode(), EngineMode::MultiGrain);

        handle.set_sample_rate(48000)?;
        handle.set_mix(2.0)?;
        handle.set_grain_count(100)?;
        handle.set_spread(-3.0)?;
        handle.set_interpolation(GrainInterpolation::Nearest)?;
        handle.record()?;
        // nothing changes before the next processed block
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.buffer_capacity(), CircularSampleBuffer::DEFAULT_CAPACITY);

        let mut output = vec![0.0; 16];
        engine.process(&[0.0; 16], &[], &mut output);
        assert_eq!(engine.state(), EngineState::Recording);
        assert_eq!(handle.state(), EngineState::Recording);
        assert_eq!(engine.buffer_capacity(), 262_144);
        assert_eq!(handle.buffer_capacity(), 262_144);
        assert_eq!(engine.window_length(), 2400);
        assert_eq!(engine.mix(), 1.0);
        assert_eq!(engine.grain_count(), MAX_GRAINS);
        assert_eq!(engine.spread(), 0.0);
        assert_eq!(engine.interpolation(), GrainInterpolation::Nearest);

        // resize uses the published sample rate
        handle.resize(20.0)?;
        handle.toggle()?;
        engine.process(&[0.0; 16], &[], &mut output);
        assert_eq!(engine.window_length(), 960);
        assert_eq!(engine.state(), EngineState::Playing);
        Ok(())
    }

    #[test]
    fn back_to_back_handle_changes() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::multi_grain(100.0, 4), &collector.handle())?;
        let handle = engine.handle();

        // no processed block in between: each change builds on the previous one
        handle.set_sample_rate(48000)?;
        handle.resize(20.0)?;
        handle.set_buffer_duration(100.0)?;

        let mut output = vec![0.0; 16];
        engine.process(&[0.0; 16], &[], &mut output);
        assert_eq!(engine.samples_per_ms(), 48.0);
        assert_eq!(engine.grain_duration_ms(), 20.0);
        assert_eq!(engine.window_length(), 960);
        assert_eq!(engine.buffer_duration_ms(), 100.0);
        assert_eq!(engine.buffer_capacity(), 8192);
        assert_eq!(handle.buffer_capacity(), 8192);

        // direct changes are picked up by handles too
        engine.prepare(8000)?;
        handle.resize(50.0)?;
        engine.process(&[0.0; 16], &[], &mut output);
        assert_eq!(engine.window_length(), 400);
        assert_eq!(engine.buffer_capacity(), 1024);
        Ok(())
    }

    #[test]
    fn buffer_duration_before_prepare() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::looper(1000.0), &collector.handle())?;
        engine.set_buffer_duration(100.0)?;
        assert_eq!(engine.buffer_capacity(), CircularSampleBuffer::DEFAULT_CAPACITY);
        assert_eq!(engine.buffer_duration_ms(), 100.0);
        engine.prepare(1000)?;
        assert_eq!(engine.buffer_capacity(), 128);

        let mut engine =
            GranularEngine::new(EngineOptions::multi_grain(50.0, 2), &collector.handle())?;
        let handle = engine.handle();
        handle.set_buffer_duration(100.0)?;
        let mut output = vec![0.0; 16];
        engine.process(&[0.0; 16], &[], &mut output);
        assert_eq!(engine.buffer_capacity(), CircularSampleBuffer::DEFAULT_CAPACITY);
        assert_eq!(engine.buffer_duration_ms(), 100.0);
        handle.set_sample_rate(1000)?;
        engine.process(&[0.0; 16], &[], &mut output);
        assert_eq!(engine.buffer_capacity(), 128);
        assert_eq!(engine.window_length(), 50);
        Ok(())
    }

    #[test]
    fn nearest_and_cubic_readback() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let ramp = (0..4096).map(|i| i as f32).collect::<Vec<_>>();
        // maps to buffer position 1024.25
        let position: f32 = -4095.0 / 8192.0;
        let window = WindowTable::new(20)?;
        for interpolation in [GrainInterpolation::Cubic, GrainInterpolation::Nearest] {
            let options = EngineOptions::single_grain(20.0)
                .mix(1.0)
                .interpolation(interpolation);
            let mut engine = GranularEngine::new(options, &collector.handle())?;
            engine.prepare(1000)?;
            assert_eq!(engine.buffer_capacity(), 4096);

            engine.record();
            let mut output = vec![0.0; ramp.len()];
            process_all(&mut engine, &ramp, &[], &mut output);
            // restart the grain at phase 0
            engine.resize(20.0)?;
            engine.play();

            let mut output = vec![0.0; 20];
            engine.process(&[0.0; 20], &[position; 20], &mut output);
            for (i, value) in output.iter().enumerate() {
                let sample = match interpolation {
                    GrainInterpolation::Cubic => (1023 + i) as f32 - 0.25,
                    GrainInterpolation::Nearest => (1024 + i) as f32,
                };
                let expected = sample * window.value(i);
                assert!(
                    (value - expected).abs() < 1e-2,
                    "{interpolation}: {value} != {expected} at {i}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn output_beyond_input_is_silenced() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine = GranularEngine::new(
            EngineOptions::multi_grain(20.0, 2).mix(0.0),
            &collector.handle(),
        )?;
        engine.prepare(8000)?;
        let input = vec![0.5; 16];

        let mut output = vec![1.0; 32];
        engine.process(&input, &[], &mut output);
        assert!(output[..16].iter().all(|v| *v == 0.5));
        assert!(output[16..].iter().all(|v| *v == 0.0));

        // shorter outputs only get the leading input samples
        let mut output = vec![1.0; 8];
        engine.process(&input, &[], &mut output);
        assert!(output.iter().all(|v| *v == 0.5));
        Ok(())
    }

    #[test]
    fn buffer_growth_resets_loop() -> Result<(), Box<Error>> {
        let collector = Collector::new();
        let mut engine =
            GranularEngine::new(EngineOptions::looper(100.0), &collector.handle())?;
        engine.prepare(1000)?;
        engine.record();
        let mut output = vec![0.0; 20];
        engine.process(&[0.5; 20], &[], &mut output);
        engine.play();
        assert_eq!(engine.loop_span().map(|span| span.length), Some(20));

        engine.set_buffer_duration(1000.0)?;
        assert_eq!(engine.buffer_capacity(), 1024);
        assert_eq!(engine.loop_span(), Some(LoopSpan::default()));
        // empty loops play silence
        engine.process(&[0.5; 20], &[], &mut output);
        assert!(output.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn invalid_options_are_rejected() {
        let collector = Collector::new();
        let options = EngineOptions::single_grain(20.0).grain_count(4);
        assert!(matches!(
            GranularEngine::new(options, &collector.handle()),
            Err(Error::ParameterError(_))
        ));
    }
}
