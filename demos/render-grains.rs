//! Renders a multi grain engine which granulates a recorded synth phrase into a wav file.

use basedrop::Collector;

use grainloop::{EngineOptions, EngineStatusEvent, GranularEngine, GrainInterpolation};

// -------------------------------------------------------------------------------------------------

// Common demo code
#[path = "./common/arguments.rs"]
mod arguments;

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

// Engine parameters (tweak as needed!)
const GRAIN_DURATION_MS: f32 = 120.0;
const GRAIN_COUNT: usize = 6;
const GRAIN_SPREAD: f32 = 0.4;
const MIX: f32 = 0.8;

// Timeline
const RECORD_SECONDS: f32 = 2.0;
const PLAY_SECONDS: f32 = 6.0;
const POSITION_LFO_HZ: f32 = 0.2;

const BLOCK_SIZE: usize = 256;

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = arguments::parse();
    let sample_rate = args.sample_rate();

    let mut collector = Collector::new();
    let mut engine = GranularEngine::new(
        EngineOptions::multi_grain(GRAIN_DURATION_MS, GRAIN_COUNT)
            .spread(GRAIN_SPREAD)
            .mix(MIX)
            .interpolation(GrainInterpolation::Cubic),
        &collector.handle(),
    )?;
    let (status_sender, status_receiver) = std::sync::mpsc::sync_channel(32);
    engine.set_status_sender(Some(status_sender));
    engine.prepare(sample_rate)?;

    let output_path = args.output_path("render-grains.wav");
    let mut writer = arguments::new_wav_writer(&output_path, sample_rate)?;

    let record_samples = (RECORD_SECONDS * sample_rate as f32) as usize;
    let total_samples = record_samples + (PLAY_SECONDS * sample_rate as f32) as usize;
    // range of trigger positions which address the recorded phrase
    let recorded_range = 2.0 * record_samples as f32 / engine.buffer_capacity() as f32;

    let mut input = vec![0.0; BLOCK_SIZE];
    let mut positions = vec![0.0; BLOCK_SIZE];
    let mut output = vec![0.0; BLOCK_SIZE];

    engine.record();
    let mut sample_time = 0;
    while sample_time < total_samples {
        if sample_time >= record_samples && sample_time < record_samples + BLOCK_SIZE {
            engine.play();
        }
        for (i, (input, position)) in input.iter_mut().zip(positions.iter_mut()).enumerate() {
            let time = (sample_time + i) as f32 / sample_rate as f32;
            *input = synth_phrase(time);
            let lfo = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * POSITION_LFO_HZ * time).cos();
            *position = -1.0 + lfo * recorded_range * 0.75;
        }
        engine.process(&input, &positions, &mut output);
        for sample in &output {
            writer.write_sample(*sample)?;
        }
        sample_time += BLOCK_SIZE;
        collector.collect();
    }
    writer.finalize()?;

    for event in status_receiver.try_iter() {
        if let EngineStatusEvent::StateChanged { from, to } = event {
            log::info!("Engine state changed from {from} to {to}");
        }
    }
    log::info!("Wrote {}", output_path.display());
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// A short, plucked saw arpeggio.
fn synth_phrase(time: f32) -> f32 {
    const NOTES: [f32; 8] = [57.0, 60.0, 64.0, 67.0, 69.0, 67.0, 64.0, 60.0];
    const NOTE_SECONDS: f32 = 0.25;

    let note_index = (time / NOTE_SECONDS) as usize % NOTES.len();
    let note_time = time % NOTE_SECONDS;
    let frequency = 440.0 * 2.0_f32.powf((NOTES[note_index] - 69.0) / 12.0);
    let phase = (time * frequency).fract();
    let envelope = (-note_time * 12.0).exp();
    (2.0 * phase - 1.0) * envelope * 0.5
}
