//! Precomputed envelope tables to fade grain and loop edges.

use std::f64::consts::PI;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Precomputed symmetric Hann window with one value per grain or loop sample.
///
/// `values[0]` and `values[len - 1]` are 0, so windowed grains and loops start and end in
/// silence. Degenerate tables with less than 2 values are pinned to 0.
#[derive(Debug, Clone, Default)]
pub struct WindowTable {
    values: Vec<f32>,
}

impl WindowTable {
    /// Create a new Hann window with `length` values.
    pub fn new(length: usize) -> Result<Self, Error> {
        let mut window = Self::with_capacity(length)?;
        window.generate(length);
        Ok(window)
    }

    /// Create an empty window which can be (re)generated with up to `capacity` values without
    /// reallocating.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        let mut values = Vec::new();
        values.try_reserve_exact(capacity)?;
        Ok(Self { values })
    }

    /// Number of values in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the window has no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Max number of values which can be generated without reallocating.
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Access to all window values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Window value at the given index. Index must be < `len()`.
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        self.values[index]
    }

    /// Regenerate the window with `length` values.
    ///
    /// Only allocates when `length` exceeds the window's capacity.
    pub fn generate(&mut self, length: usize) {
        self.values.clear();
        if length < 2 {
            self.values.resize(length, 0.0);
        } else {
            let denominator = (length - 1) as f64;
            self.values.extend((0..length).map(|i| {
                let phase = i as f64 / denominator;
                (0.5 * (1.0 - (2.0 * PI * phase).cos())) as f32
            }));
        }
    }
}

// -------------------------------------------------------------------------------------------------
