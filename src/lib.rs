#![doc = include_str!("../README.md")]
#![cfg_attr(all(doc, docsrs), feature(doc_auto_cfg))]

// private mods (will be partly re-exported)
mod engine;
mod error;
mod parameter;

// public, flat re-exports
pub use error::Error;

pub use engine::{
    EngineEvent, EngineHandle, EngineMode, EngineOptions, EngineState, EngineStatusEvent,
    GrainScheduler, GranularEngine, LoopCapture, LoopSpan, Transition, MAX_GRAINS,
};

pub use utils::interpolation::GrainInterpolation;

// public mods
pub mod utils;

pub mod parameters {
    //! Engine parameter descriptors.

    pub use super::engine::{BUFFER_DURATION, GRAIN_COUNT, MIX, SPREAD, WINDOW_DURATION};
    pub use super::parameter::{FloatParameter, IntegerParameter, Parameter, ParameterType};
}
