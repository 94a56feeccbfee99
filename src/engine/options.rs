use four_cc::FourCC;

use crate::{
    parameter::{FloatParameter, IntegerParameter, Parameter},
    utils::interpolation::GrainInterpolation,
    Error,
};

use super::grains::MAX_GRAINS;

// -------------------------------------------------------------------------------------------------

/// Engine variant of a [`GranularEngine`](crate::GranularEngine).
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
pub enum EngineMode {
    /// One windowed grain at the trigger position.
    SingleGrain,
    /// Multiple windowed grains, offset from the trigger position by the grain spread.
    #[default]
    MultiGrain,
    /// Captures a loop from a rolling record buffer and plays it back.
    Looper,
}

impl EngineMode {
    /// True for the grain playback modes.
    pub fn is_granular(self) -> bool {
        matches!(self, EngineMode::SingleGrain | EngineMode::MultiGrain)
    }

    /// Descriptors of all parameters which apply to the mode.
    pub fn parameters(self) -> Vec<Box<dyn Parameter>> {
        match self {
            EngineMode::SingleGrain | EngineMode::Looper => vec![
                Box::new(MIX),
                Box::new(WINDOW_DURATION),
                Box::new(BUFFER_DURATION),
            ],
            EngineMode::MultiGrain => vec![
                Box::new(MIX),
                Box::new(WINDOW_DURATION),
                Box::new(GRAIN_COUNT),
                Box::new(SPREAD),
                Box::new(BUFFER_DURATION),
            ],
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Wet/dry balance: 0 is dry only, 1 is wet only.
pub const MIX: FloatParameter = FloatParameter::new(FourCC(*b"mix_"), "Mix", 0.0..=1.0, 0.5);

/// Grain offset factor, relative to the grain length.
pub const SPREAD: FloatParameter =
    FloatParameter::new(FourCC(*b"sprd"), "Spread", 0.0..=f32::MAX, 0.3);

/// Number of simultaneous grains.
pub const GRAIN_COUNT: IntegerParameter =
    IntegerParameter::new(FourCC(*b"grnc"), "Grains", 1..=MAX_GRAINS as i32, 1);

/// Grain length, or the length of a re-delimited loop.
pub const WINDOW_DURATION: FloatParameter =
    FloatParameter::new(FourCC(*b"wndw"), "Window", 10.0..=f32::MAX, 100.0).with_unit("ms");

/// Minimum duration of the record buffer.
pub const BUFFER_DURATION: FloatParameter =
    FloatParameter::new(FourCC(*b"bufd"), "Buffer", 1.0..=f32::MAX, 4000.0).with_unit("ms");

// -------------------------------------------------------------------------------------------------

/// Construction options for a [`GranularEngine`](crate::GranularEngine).
///
/// Numeric options are clamped to their parameter's range when the engine gets created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Engine variant.
    pub mode: EngineMode,
    /// Grain length in milliseconds. Unused by loopers.
    pub grain_duration_ms: f32,
    /// Number of grains. Must be 1 for single grain engines.
    pub grain_count: usize,
    /// Grain spread. Must be 0 for single grain engines.
    pub spread: f32,
    /// Initial wet/dry mix.
    pub mix: f32,
    /// Minimum duration of the record buffer in milliseconds.
    pub buffer_duration_ms: f32,
    /// Fractional grain readback mode.
    pub interpolation: GrainInterpolation,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::multi_grain(WINDOW_DURATION.default_value(), 4)
    }
}

impl EngineOptions {
    /// Options for a single grain engine. Grain durations <= 10ms fall back to 10ms.
    pub fn single_grain(grain_duration_ms: f32) -> Self {
        Self {
            mode: EngineMode::SingleGrain,
            grain_duration_ms: Self::creation_grain_duration(grain_duration_ms),
            grain_count: 1,
            spread: 0.0,
            mix: MIX.default_value(),
            buffer_duration_ms: BUFFER_DURATION.default_value(),
            interpolation: GrainInterpolation::default(),
        }
    }

    /// Options for a multi grain engine. Grain durations <= 10ms fall back to 10ms, a zero
    /// grain count to a single grain.
    pub fn multi_grain(grain_duration_ms: f32, grain_count: usize) -> Self {
        Self {
            mode: EngineMode::MultiGrain,
            grain_duration_ms: Self::creation_grain_duration(grain_duration_ms),
            grain_count: grain_count.max(1),
            spread: SPREAD.default_value(),
            mix: MIX.default_value(),
            buffer_duration_ms: BUFFER_DURATION.default_value(),
            interpolation: GrainInterpolation::default(),
        }
    }

    /// Options for a loop engine with the given minimum buffer duration. Durations <= 1ms fall
    /// back to 4 seconds.
    pub fn looper(buffer_duration_ms: f32) -> Self {
        let buffer_duration_ms = if buffer_duration_ms > 1.0 {
            buffer_duration_ms
        } else {
            BUFFER_DURATION.default_value()
        };
        Self {
            mode: EngineMode::Looper,
            grain_duration_ms: WINDOW_DURATION.default_value(),
            grain_count: 1,
            spread: 0.0,
            mix: 1.0,
            buffer_duration_ms,
            interpolation: GrainInterpolation::default(),
        }
    }

    pub fn grain_duration_ms(mut self, grain_duration_ms: f32) -> Self {
        self.grain_duration_ms = grain_duration_ms;
        self
    }

    pub fn grain_count(mut self, grain_count: usize) -> Self {
        self.grain_count = grain_count;
        self
    }

    pub fn spread(mut self, spread: f32) -> Self {
        self.spread = spread;
        self
    }

    pub fn mix(mut self, mix: f32) -> Self {
        self.mix = mix;
        self
    }

    pub fn buffer_duration_ms(mut self, buffer_duration_ms: f32) -> Self {
        self.buffer_duration_ms = buffer_duration_ms;
        self
    }

    pub fn interpolation(mut self, interpolation: GrainInterpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Validate options which can't be clamped into a meaningful configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.mode == EngineMode::SingleGrain && self.grain_count != 1 {
            return Err(Error::ParameterError(format!(
                "Single grain engines play exactly one grain, got a grain count of {}",
                self.grain_count
            )));
        }
        if self.mode == EngineMode::SingleGrain && self.spread != 0.0 {
            return Err(Error::ParameterError(
                "Single grain engines have no spread".to_string(),
            ));
        }
        if !self.grain_duration_ms.is_finite() {
            return Err(Error::ParameterError(format!(
                "Grain duration must be finite, got {}",
                self.grain_duration_ms
            )));
        }
        if !self.buffer_duration_ms.is_finite() {
            return Err(Error::ParameterError(format!(
                "Buffer duration must be finite, got {}",
                self.buffer_duration_ms
            )));
        }
        Ok(())
    }

    /// Copy of the options with all numeric values clamped to their parameter ranges.
    pub(crate) fn clamped(self) -> Self {
        Self {
            grain_duration_ms: WINDOW_DURATION.clamp_value(self.grain_duration_ms),
            grain_count: GRAIN_COUNT.clamp_count(self.grain_count),
            spread: SPREAD.clamp_value(self.spread),
            mix: MIX.clamp_value(self.mix),
            buffer_duration_ms: BUFFER_DURATION.clamp_value(self.buffer_duration_ms),
            ..self
        }
    }

    fn creation_grain_duration(grain_duration_ms: f32) -> f32 {
        if grain_duration_ms > 10.0 {
            grain_duration_ms
        } else {
            10.0
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_fallbacks() {
        let options = EngineOptions::single_grain(5.0);
        assert_eq!(options.grain_duration_ms, 10.0);
        assert_eq!(options.spread, 0.0);
        assert_eq!(options.mix, 0.5);
        assert!(options.validate().is_ok());

        let options = EngineOptions::multi_grain(f32::NAN, 0);
        assert_eq!(options.grain_duration_ms, 10.0);
        assert_eq!(options.grain_count, 1);
        assert_eq!(options.spread, 0.3);

        let options = EngineOptions::looper(0.5);
        assert_eq!(options.buffer_duration_ms, 4000.0);
        assert_eq!(options.mix, 1.0);
        assert_eq!(EngineOptions::looper(250.0).buffer_duration_ms, 250.0);
    }

    #[test]
    fn validation() {
        assert!(EngineOptions::single_grain(50.0)
            .grain_count(2)
            .validate()
            .is_err());
        assert!(EngineOptions::single_grain(50.0)
            .spread(0.5)
            .validate()
            .is_err());
        assert!(EngineOptions::default()
            .buffer_duration_ms(f32::INFINITY)
            .validate()
            .is_err());
        assert!(EngineOptions::default().validate().is_ok());
    }

    #[test]
    fn clamping() {
        let options = EngineOptions::multi_grain(50.0, 500)
            .spread(-1.0)
            .mix(3.0)
            .grain_duration_ms(1.0)
            .clamped();
        assert_eq!(options.grain_count, MAX_GRAINS);
        assert_eq!(options.spread, 0.0);
        assert_eq!(options.mix, 1.0);
        assert_eq!(options.grain_duration_ms, 10.0);
    }

    #[test]
    fn parameter_descriptors() {
        let ids = EngineOptions::default()
            .mode
            .parameters()
            .iter()
            .map(|p| p.id())
            .collect::<Vec<_>>();
        assert!(ids.contains(&SPREAD.id()));
        assert!(ids.contains(&GRAIN_COUNT.id()));
        let ids = EngineMode::Looper
            .parameters()
            .iter()
            .map(|p| p.id())
            .collect::<Vec<_>>();
        assert!(!ids.contains(&SPREAD.id()));
        assert!(ids.contains(&MIX.id()));
    }
}
