//! Engine parameter descriptors.

use std::{fmt::Debug, ops::RangeInclusive};

use four_cc::FourCC;

// -------------------------------------------------------------------------------------------------

/// Describes the type of a [`Parameter`] to e.g. select a proper visual representation in a UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterType {
    /// A continuous floating-point value.
    Float {
        range: RangeInclusive<f32>,
        default: f32,
    },
    /// A discrete integer value.
    Integer {
        range: RangeInclusive<i32>,
        default: i32,
    },
}

// -------------------------------------------------------------------------------------------------

/// Describes a single control value of a [`GranularEngine`](crate::GranularEngine) for use in
/// UIs or host adapters.
///
/// Engines never reject out of range values: they clamp them with the descriptor's range.
pub trait Parameter: Debug + Send + Sync {
    /// The unique id of the parameter.
    fn id(&self) -> FourCC;

    /// The name of the parameter.
    fn name(&self) -> &'static str;

    /// The parameter type, range and default value.
    fn parameter_type(&self) -> ParameterType;

    /// Convert the given plain value to a string value.
    fn value_to_string(&self, value: f32, include_unit: bool) -> String;
}

// -------------------------------------------------------------------------------------------------

mod float;
pub use float::FloatParameter;

mod integer;
pub use integer::IntegerParameter;
