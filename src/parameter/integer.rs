use std::ops::RangeInclusive;

use four_cc::FourCC;

use super::{Parameter, ParameterType};

// -------------------------------------------------------------------------------------------------

/// A discrete (integer) parameter descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegerParameter {
    id: FourCC,
    name: &'static str,
    range: RangeInclusive<i32>,
    default: i32,
    unit: &'static str,
}

impl IntegerParameter {
    pub const fn new(
        id: FourCC,
        name: &'static str,
        range: RangeInclusive<i32>,
        default: i32,
    ) -> Self {
        assert!(
            default >= *range.start() && default <= *range.end(),
            "Invalid parameter default value"
        );
        Self {
            id,
            name,
            range,
            default,
            unit: "",
        }
    }

    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    pub fn range(&self) -> &RangeInclusive<i32> {
        &self.range
    }

    pub fn default_value(&self) -> i32 {
        self.default
    }

    pub fn clamp_value(&self, value: i32) -> i32 {
        value.clamp(*self.range.start(), *self.range.end())
    }

    /// Clamp an unsigned count into the parameter's range.
    pub fn clamp_count(&self, count: usize) -> usize {
        let value = i32::try_from(count).unwrap_or(i32::MAX);
        self.clamp_value(value).max(0) as usize
    }
}

impl Parameter for IntegerParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Integer {
            range: self.range.clone(),
            default: self.default,
        }
    }

    fn value_to_string(&self, value: f32, include_unit: bool) -> String {
        let value = self.clamp_value(value.round() as i32);
        if include_unit && !self.unit.is_empty() {
            format!("{} {}", value, self.unit)
        } else {
            value.to_string()
        }
    }
}

// -------------------------------------------------------------------------------------------------
