//! Piecewise-linear curves used for strength transforms and distance attenuation.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A keyed curve on `[0, 1]`. Input is clamped to the key range and output to `[0, 1]`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Curve {
    /// `(input, output)` keys sorted by input.
    keys: Vec<(f32, f32)>,
}

impl Curve {
    /// Identity on `[0, 1]`.
    pub fn linear() -> Self {
        Self {
            keys: vec![(0.0, 0.0), (1.0, 1.0)],
        }
    }

    pub fn constant(value: f32) -> Self {
        Self {
            keys: vec![(0.0, value), (1.0, value)],
        }
    }

    /// Builds a curve from unordered keys. An empty key list yields [`Curve::linear`].
    pub fn from_keys(keys: impl IntoIterator<Item = (f32, f32)>) -> Self {
        let mut keys: Vec<(f32, f32)> = keys
            .into_iter()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        if keys.is_empty() {
            return Self::linear();
        }
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { keys }
    }

    /// Falls from 1 at the center to 0 at the edge.
    pub fn falloff() -> Self {
        Self::from_keys([(0.0, 1.0), (1.0, 0.0)])
    }

    pub fn keys(&self) -> &[(f32, f32)] {
        &self.keys
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::linear()
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let value = match self.keys.as_slice() {
            [] => t,
            [(_, y)] => *y,
            keys => {
                let first = keys[0];
                let last = keys[keys.len() - 1];
                if t <= first.0 {
                    first.1
                } else if t >= last.0 {
                    last.1
                } else {
                    let i = keys.partition_point(|k| k.0 <= t);
                    let (x0, y0) = keys[i - 1];
                    let (x1, y1) = keys[i];
                    let span = x1 - x0;
                    if span <= f32::EPSILON {
                        y1
                    } else {
                        y0 + (y1 - y0) * (t - x0) / span
                    }
                }
            }
        };
        value.clamp(0.0, 1.0)
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self::linear()
    }
}
