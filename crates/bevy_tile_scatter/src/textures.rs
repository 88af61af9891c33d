use std::sync::Arc;

use bevy::prelude::Image;
use bevy::render::render_resource::TextureFormat;
use glam::Vec2;
use tile_scatter::prelude::{Texture, TextureChannel, WorldRect};

/// Snapshot of a Bevy [`Image`] stretched over a world rectangle, usable as a mask or
/// area-mask [`Texture`].
///
/// Pixel rows run along +z starting at `bounds.min`. Samples outside the bounds clamp to the
/// edge texels. Re-create the texture when the source image changes.
pub struct ImageTexture {
    bounds: WorldRect,
    format: TextureFormat,
    pixels: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl ImageTexture {
    /// `None` for unsupported formats or images without CPU-side data.
    pub fn from_image(image: &Image, bounds: WorldRect) -> Option<Self> {
        let format = image.texture_descriptor.format;

        let supported = matches!(
            format,
            TextureFormat::R8Unorm
                | TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba8UnormSrgb
                | TextureFormat::Bgra8Unorm
                | TextureFormat::Bgra8UnormSrgb
        );
        if !supported {
            return None;
        }

        Some(Self {
            bounds,
            format,
            pixels: Arc::new(image.data.clone()?),
            width: image.texture_descriptor.size.width,
            height: image.texture_descriptor.size.height,
        })
    }

    pub fn bounds(&self) -> WorldRect {
        self.bounds
    }

    #[inline]
    fn bytes_per_pixel(&self) -> usize {
        match self.format {
            TextureFormat::R8Unorm => 1,
            _ => 4,
        }
    }

    #[inline]
    fn channel_offset(&self, channel: TextureChannel) -> Option<usize> {
        match self.format {
            TextureFormat::R8Unorm => (channel == TextureChannel::R).then_some(0),
            TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => Some(match channel {
                TextureChannel::B => 0,
                TextureChannel::G => 1,
                TextureChannel::R => 2,
                TextureChannel::A => 3,
            }),
            _ => Some(match channel {
                TextureChannel::R => 0,
                TextureChannel::G => 1,
                TextureChannel::B => 2,
                TextureChannel::A => 3,
            }),
        }
    }

    fn texel(&self, p: Vec2) -> Option<(u32, u32)> {
        let (w, h) = (self.width, self.height);
        let size = self.bounds.size();
        if w == 0 || h == 0 || size.x <= 0.0 || size.y <= 0.0 {
            return None;
        }
        let uv = ((p - self.bounds.min) / size).clamp(Vec2::ZERO, Vec2::ONE);
        let x = ((uv.x * w as f32) as u32).min(w - 1);
        let y = ((uv.y * h as f32) as u32).min(h - 1);
        Some((x, y))
    }
}

impl Texture for ImageTexture {
    fn sample(&self, channel: TextureChannel, p: Vec2) -> f32 {
        let Some((x, y)) = self.texel(p) else {
            return 0.0;
        };
        let Some(offset) = self.channel_offset(channel) else {
            return 0.0;
        };
        let base = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel();
        let byte = self.pixels.get(base + offset).copied().unwrap_or(0);
        byte as f32 / 255.0
    }
}
