//! Mask node definitions.
//!
//! A [`MaskNode`] pairs a [`MaskOperation`] producing a value per pixel with the
//! [`BlendMode`] used to fold that value into the stack's accumulator.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::noise::NoiseParams;
use super::texture::TextureChannel;

/// How a node's value `v` folds into the accumulator `a`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Multiply,
    Add,
    Subtract,
    Min,
    Max,
    Override,
}

impl BlendMode {
    #[inline]
    pub fn apply(self, a: f32, v: f32) -> f32 {
        match self {
            BlendMode::Multiply => a * v,
            BlendMode::Add => a + v,
            BlendMode::Subtract => a - v,
            BlendMode::Min => a.min(v),
            BlendMode::Max => a.max(v),
            BlendMode::Override => v,
        }
    }
}

/// Coordinate frame of position- and height-dependent operations.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InfluenceScope {
    /// World coordinates and absolute heights.
    #[default]
    Global,
    /// Coordinates relative to the workspace center, heights normalized to the canvas range.
    Local,
}

/// Value source of a mask node.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum MaskOperation {
    Constant {
        value: f32,
    },
    /// 1 inside `[min, max]`, smoothstep falloff over `falloff` on both sides.
    Height {
        min: f32,
        max: f32,
        falloff: f32,
    },
    /// Terrain slope in degrees, same banding as [`MaskOperation::Height`].
    Slope {
        min_degrees: f32,
        max_degrees: f32,
        falloff_degrees: f32,
    },
    Noise(NoiseParams),
    /// 0 where instances or baked masks carrying any of `tags` occupy the pixel, grown by
    /// `radius`.
    Collision {
        tags: Vec<String>,
        radius: f32,
    },
    /// Distance to the nearest occupied pixel divided by `max_distance`.
    CollisionDistance {
        tags: Vec<String>,
        max_distance: f32,
    },
    SplatLayer {
        layer: usize,
    },
    Texture {
        texture_id: String,
        channel: TextureChannel,
    },
    /// The parent stack's output.
    GlobalPassthrough,
}

/// One entry of a mask stack.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct MaskNode {
    pub operation: MaskOperation,
    #[cfg_attr(feature = "serde", serde(default))]
    pub blend: BlendMode,
    #[cfg_attr(feature = "serde", serde(default))]
    pub invert: bool,
    #[cfg_attr(feature = "serde", serde(default = "default_active"))]
    pub active: bool,
}

#[cfg(feature = "serde")]
fn default_active() -> bool {
    true
}

impl MaskNode {
    pub fn new(operation: MaskOperation) -> Self {
        Self {
            operation,
            blend: BlendMode::Multiply,
            invert: false,
            active: true,
        }
    }

    pub fn constant(value: f32) -> Self {
        Self::new(MaskOperation::Constant { value })
    }

    pub fn height(min: f32, max: f32, falloff: f32) -> Self {
        Self::new(MaskOperation::Height { min, max, falloff })
    }

    pub fn slope(min_degrees: f32, max_degrees: f32, falloff_degrees: f32) -> Self {
        Self::new(MaskOperation::Slope {
            min_degrees,
            max_degrees,
            falloff_degrees,
        })
    }

    pub fn noise(params: NoiseParams) -> Self {
        Self::new(MaskOperation::Noise(params))
    }

    pub fn collision<S: Into<String>>(tags: impl IntoIterator<Item = S>, radius: f32) -> Self {
        Self::new(MaskOperation::Collision {
            tags: tags.into_iter().map(Into::into).collect(),
            radius,
        })
    }

    pub fn collision_distance<S: Into<String>>(
        tags: impl IntoIterator<Item = S>,
        max_distance: f32,
    ) -> Self {
        Self::new(MaskOperation::CollisionDistance {
            tags: tags.into_iter().map(Into::into).collect(),
            max_distance,
        })
    }

    pub fn splat_layer(layer: usize) -> Self {
        Self::new(MaskOperation::SplatLayer { layer })
    }

    pub fn texture(texture_id: impl Into<String>, channel: TextureChannel) -> Self {
        Self::new(MaskOperation::Texture {
            texture_id: texture_id.into(),
            channel,
        })
    }

    pub fn passthrough() -> Self {
        Self::new(MaskOperation::GlobalPassthrough)
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// 1 inside `[min, max]`, smoothstep ramps of width `falloff` outside, 0 beyond.
pub fn band(value: f32, min: f32, max: f32, falloff: f32) -> f32 {
    if value >= min && value <= max {
        return 1.0;
    }
    if falloff <= 0.0 {
        return 0.0;
    }
    let distance = if value < min { min - value } else { value - max };
    if distance >= falloff {
        return 0.0;
    }
    let t = 1.0 - distance / falloff;
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_modes() {
        assert_eq!(BlendMode::Multiply.apply(0.5, 0.5), 0.25);
        assert_eq!(BlendMode::Add.apply(0.5, 0.25), 0.75);
        assert_eq!(BlendMode::Subtract.apply(0.5, 0.75), -0.25);
        assert_eq!(BlendMode::Min.apply(0.5, 0.25), 0.25);
        assert_eq!(BlendMode::Max.apply(0.5, 0.25), 0.5);
        assert_eq!(BlendMode::Override.apply(0.5, 0.25), 0.25);
    }

    #[test]
    fn band_is_one_inside_and_fades_out() {
        assert_eq!(band(5.0, 0.0, 10.0, 2.0), 1.0);
        assert_eq!(band(13.0, 0.0, 10.0, 2.0), 0.0);
        assert_eq!(band(11.0, 0.0, 10.0, 2.0), 0.5);
        assert_eq!(band(-1.0, 0.0, 10.0, 0.0), 0.0);
        let near = band(10.5, 0.0, 10.0, 2.0);
        assert!(near > 0.5 && near < 1.0);
    }

    #[test]
    fn builders_set_flags() {
        let node = MaskNode::constant(0.3)
            .with_blend(BlendMode::Add)
            .inverted()
            .with_active(false);
        assert_eq!(node.blend, BlendMode::Add);
        assert!(node.invert);
        assert!(!node.active);
        let c = MaskNode::collision(["oak", "rock"], 1.5);
        assert!(
            matches!(c.operation, MaskOperation::Collision { ref tags, .. } if tags.len() == 2)
        );
    }
}
