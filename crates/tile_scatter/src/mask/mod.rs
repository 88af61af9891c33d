//! Mask stacks: declarative filters folded into density fields.
//!
//! A [`MaskStack`] is an ordered list of [`MaskNode`]s. Each node produces a value per canvas
//! pixel (constant, height band, slope band, fractal noise, collision occupancy, collision
//! distance, splat weight, external texture, or the parent stack's output) and folds it into
//! an accumulator with its [`BlendMode`]. [`hierarchy::evaluate_hierarchy`] chains the biome,
//! spawner and rule stacks of one rule.
pub mod curve;
pub mod distance;
pub mod hierarchy;
pub mod node;
pub mod noise;
pub mod stack;
pub mod texture;

pub use curve::Curve;
pub use hierarchy::{evaluate_hierarchy, MaskHierarchy};
pub use node::{BlendMode, InfluenceScope, MaskNode, MaskOperation};
pub use noise::{NoiseKind, NoiseParams};
pub use stack::{CollisionInputs, MaskContext, MaskOutput, MaskStack};
pub use texture::{RasterTexture, Texture, TextureChannel, TextureRegistry};
