//! DSP building blocks of the engine: record buffers, fade windows and interpolation.

pub mod buffer;
pub mod interpolation;
pub mod window;

pub use buffer::CircularSampleBuffer;
pub use interpolation::{cubic_look_behind, GrainInterpolation};
pub use window::WindowTable;
