//! Fractional position readers for circular sample buffers.

use super::buffer::CircularSampleBuffer;

// -------------------------------------------------------------------------------------------------

/// Readback mode for grain samples at fractional buffer positions.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
)]
#[repr(u8)]
pub enum GrainInterpolation {
    /// 4-point cubic look-behind interpolation. Smooth output for arbitrary trigger positions.
    #[default]
    Cubic,
    /// Truncates the fractional position and reads the nearest sample. Cheaper, but stair-steps
    /// when trigger positions move slowly.
    Nearest,
}

// -------------------------------------------------------------------------------------------------

/// 4-point, 3rd-order cubic interpolation which looks behind the given buffer position: it uses
/// the sample at `index` and the three samples preceding it. Each index gets wrapped
/// independently, so reads across the buffer's start are seamless.
///
/// `fraction` must be in range `[0, 1)`. At fraction 0 this returns the sample at `index - 1`.
#[inline]
pub fn cubic_look_behind(buffer: &CircularSampleBuffer, index: usize, fraction: f32) -> f32 {
    debug_assert!((0.0..=1.0).contains(&fraction));

    let a = buffer.read_at(index);
    let b = buffer.read_at(index.wrapping_sub(1));
    let c = buffer.read_at(index.wrapping_sub(2));
    let d = buffer.read_at(index.wrapping_sub(3));
    let c_minus_b = c - b;

    b + fraction
        * (c_minus_b
            - (1.0 / 6.0)
                * (1.0 - fraction)
                * ((d - a - 3.0 * c_minus_b) * fraction + (d + 2.0 * a - 3.0 * b)))
}

// -------------------------------------------------------------------------------------------------

/// Static dispatch for [`GrainInterpolation`] modes, which keeps the mode switch out of the
/// per-sample loops.
pub(crate) trait SampleReader {
    fn read(buffer: &CircularSampleBuffer, index: usize, fraction: f32) -> f32;
}

pub(crate) struct CubicReader;

impl SampleReader for CubicReader {
    #[inline(always)]
    fn read(buffer: &CircularSampleBuffer, index: usize, fraction: f32) -> f32 {
        cubic_look_behind(buffer, index, fraction)
    }
}

pub(crate) struct NearestReader;

impl SampleReader for NearestReader {
    #[inline(always)]
    fn read(buffer: &CircularSampleBuffer, index: usize, _fraction: f32) -> f32 {
        buffer.read_at(index)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn buffer_from(samples: &[f32]) -> Result<CircularSampleBuffer, Box<Error>> {
        let mut buffer = CircularSampleBuffer::new(samples.len())?;
        for sample in samples {
            buffer.write(*sample);
        }
        Ok(buffer)
    }

    #[test]
    fn constant_signal() -> Result<(), Box<Error>> {
        let buffer = buffer_from(&[0.75; 64])?;
        for index in [0, 1, 2, 3, 31, 63, 64, 1000] {
            for fraction in [0.0, 0.1, 0.25, 0.5, 0.77, 0.999] {
                let value = cubic_look_behind(&buffer, index, fraction);
                assert!((value - 0.75).abs() < 1e-6, "{value} at {index}/{fraction}");
            }
        }
        Ok(())
    }

    #[test]
    fn linear_signal() -> Result<(), Box<Error>> {
        let ramp = (0..16).map(|i| i as f32).collect::<Vec<_>>();
        let buffer = buffer_from(&ramp)?;
        for index in 3..16 {
            for fraction in [0.0, 0.3, 0.5, 0.9] {
                let value = cubic_look_behind(&buffer, index, fraction);
                let expected = (index - 1) as f32 - fraction;
                assert!((value - expected).abs() < 1e-5, "{value} != {expected}");
            }
        }
        Ok(())
    }

    #[test]
    fn look_behind_wraps() -> Result<(), Box<Error>> {
        let buffer = buffer_from(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])?;
        // index 0 reads 8.0, 7.0 and 6.0 behind it
        assert_eq!(cubic_look_behind(&buffer, 0, 0.0), 8.0);
        assert_eq!(cubic_look_behind(&buffer, 1, 0.0), 1.0);
        assert_eq!(cubic_look_behind(&buffer, 8 + 1, 0.0), 1.0);
        Ok(())
    }

    #[test]
    fn readers() -> Result<(), Box<Error>> {
        let buffer = buffer_from(&[0.0, 1.0, 0.0, -1.0])?;
        assert_eq!(NearestReader::read(&buffer, 1, 0.5), 1.0);
        assert_eq!(NearestReader::read(&buffer, 5, 0.5), 1.0);
        assert_eq!(
            CubicReader::read(&buffer, 2, 0.5),
            cubic_look_behind(&buffer, 2, 0.5)
        );
        Ok(())
    }
}
