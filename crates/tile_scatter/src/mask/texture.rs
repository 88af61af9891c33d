//! External image inputs for mask nodes and rule area masks.
//!
//! - Define custom sources by implementing [`Texture`].
//! - Manage instances with [`TextureRegistry`].
//! - Wrap a single-channel raster with [`RasterTexture`].
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::raster::Raster;

/// Texture channel to sample from.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureChannel {
    #[default]
    R,
    G,
    B,
    A,
}

/// A 2D image sampled at a position in world or center-relative coordinates.
/// Implementors map the position to their own texel space.
pub trait Texture: Send + Sync {
    fn sample(&self, channel: TextureChannel, p: Vec2) -> f32;
}

/// Single-channel raster exposed as a texture. Every channel reads the same value.
#[derive(Clone, Debug)]
pub struct RasterTexture {
    pub raster: Raster,
}

impl RasterTexture {
    pub fn new(raster: Raster) -> Self {
        Self { raster }
    }
}

impl Texture for RasterTexture {
    fn sample(&self, _channel: TextureChannel, p: Vec2) -> f32 {
        self.raster.sample_nearest(p)
    }
}

/// Textures by id.
#[non_exhaustive]
#[derive(Clone, Default)]
pub struct TextureRegistry {
    textures: HashMap<String, Arc<dyn Texture>>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn register<T>(&mut self, id: impl Into<String>, texture: T)
    where
        T: Texture + 'static,
    {
        self.textures.insert(id.into(), Arc::new(texture));
    }

    pub fn register_arc(&mut self, id: impl Into<String>, texture: Arc<dyn Texture>) {
        self.textures.insert(id.into(), texture);
    }

    /// Returns `true` if a texture was removed.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.textures.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.textures.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Texture>> {
        self.textures.get(id).cloned()
    }

    /// Samples a texture; unknown ids read as `0.0` with a warning.
    #[inline]
    pub fn sample(&self, texture_id: &str, channel: TextureChannel, p: Vec2) -> f32 {
        match self.textures.get(texture_id) {
            Some(tex) => tex.sample(channel, p),
            None => {
                warn!("Unknown texture id '{}'.", texture_id);
                0.0
            }
        }
    }
}

impl fmt::Debug for TextureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.textures.keys().collect();
        ids.sort();
        f.debug_struct("TextureRegistry").field("ids", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::CanvasGrid;

    struct Stripes;

    impl Texture for Stripes {
        fn sample(&self, channel: TextureChannel, p: Vec2) -> f32 {
            match channel {
                TextureChannel::R => {
                    if p.x.rem_euclid(2.0) < 1.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => 0.5,
            }
        }
    }

    #[test]
    fn registry_samples_registered_textures() {
        let mut registry = TextureRegistry::new();
        registry.register("stripes", Stripes);
        assert!(registry.contains("stripes"));
        assert_eq!(registry.sample("stripes", TextureChannel::R, Vec2::new(0.5, 0.0)), 1.0);
        assert_eq!(registry.sample("stripes", TextureChannel::R, Vec2::new(1.5, 0.0)), 0.0);
        assert_eq!(registry.sample("stripes", TextureChannel::G, Vec2::ZERO), 0.5);
        assert_eq!(registry.sample("missing", TextureChannel::R, Vec2::ZERO), 0.0);
        assert!(registry.unregister("stripes"));
        assert!(registry.is_empty());
    }

    #[test]
    fn raster_texture_reads_nearest_pixel() {
        let mut raster = Raster::new(CanvasGrid::new(Vec2::ZERO, 1.0, 2, 2));
        raster.set(1, 0, 0.8);
        let tex = RasterTexture::new(raster);
        assert_eq!(tex.sample(TextureChannel::A, Vec2::new(1.2, 0.3)), 0.8);
        assert_eq!(tex.sample(TextureChannel::R, Vec2::new(5.0, 5.0)), 0.0);
    }
}
