//! Renders a looper which captures a phrase from its live input and loops it, controlled from
//! a separate control thread via an engine handle.

use std::{thread, time::Duration};

use basedrop::Collector;

use grainloop::{EngineOptions, EngineState, GranularEngine};

// -------------------------------------------------------------------------------------------------

// Common demo code
#[path = "./common/arguments.rs"]
mod arguments;

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const BUFFER_DURATION_MS: f32 = 4000.0;
const LOOP_DURATION_MS: u64 = 1500;
const RENDER_SECONDS: f32 = 8.0;

const BLOCK_SIZE: usize = 256;

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = arguments::parse();
    let sample_rate = args.sample_rate();

    let mut collector = Collector::new();
    let mut engine = GranularEngine::new(
        EngineOptions::looper(BUFFER_DURATION_MS),
        &collector.handle(),
    )?;

    // configure and drive the engine from a control thread
    let handle = engine.handle();
    handle.set_sample_rate(sample_rate)?;
    let control_thread = thread::spawn({
        let handle = handle.clone();
        move || -> Result<(), grainloop::Error> {
            thread::sleep(Duration::from_millis(20));
            handle.record()?;
            while handle.state() != EngineState::Recording {
                thread::sleep(Duration::from_millis(1));
            }
            thread::sleep(Duration::from_millis(LOOP_DURATION_MS));
            handle.play()
        }
    });

    let output_path = args.output_path("render-loop.wav");
    let mut writer = arguments::new_wav_writer(&output_path, sample_rate)?;

    // render in real-time, so the control thread's timing matches the rendered audio
    let block_duration = Duration::from_secs_f32(BLOCK_SIZE as f32 / sample_rate as f32);
    let total_samples = (RENDER_SECONDS * sample_rate as f32) as usize;

    let mut input = vec![0.0; BLOCK_SIZE];
    let mut output = vec![0.0; BLOCK_SIZE];
    let mut sample_time = 0;
    while sample_time < total_samples {
        for (i, input) in input.iter_mut().enumerate() {
            let time = (sample_time + i) as f32 / sample_rate as f32;
            *input = drum_pattern(time);
        }
        engine.process(&input, &[], &mut output);
        for sample in &output {
            writer.write_sample(*sample)?;
        }
        sample_time += BLOCK_SIZE;
        collector.collect();
        thread::sleep(block_duration);
    }
    writer.finalize()?;

    control_thread
        .join()
        .map_err(|_| "Control thread panicked")??;
    if let Some(span) = engine.loop_span() {
        log::info!(
            "Captured a loop of {} samples at buffer position {}",
            span.length,
            span.start
        );
    }
    log::info!("Wrote {}", output_path.display());
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// A simple kick and hat pattern at 120 bpm.
fn drum_pattern(time: f32) -> f32 {
    const BEAT_SECONDS: f32 = 0.5;

    let beat_time = time % BEAT_SECONDS;
    let kick_frequency = 50.0 + 100.0 * (-beat_time * 30.0).exp();
    let kick = (2.0 * std::f32::consts::PI * kick_frequency * beat_time).sin()
        * (-beat_time * 8.0).exp();

    let hat_time = (time + BEAT_SECONDS / 2.0) % BEAT_SECONDS;
    let noise = ((time * 12_345.679).sin() * 43_758.547).fract() * 2.0 - 1.0;
    let hat = noise * (-hat_time * 60.0).exp() * 0.3;

    (kick + hat) * 0.6
}
