//! World and pixel rectangles and the pixel lattice every raster is laid on.
//!
//! Pixels are cell-centered: pixel `(ix, iy)` of a [`CanvasGrid`] covers
//! `origin + [ix, ix + 1) * cell_size` and is sampled at its center. A pixel belongs to a world
//! rectangle when its center lies inside the half-open rectangle, so two abutting rectangles
//! partition a shared lattice without overlap.
use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Resolution class of a channel. Each class gets its own canvas inside a workspace.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelClass {
    /// Heightmap resolution; also used for baked masks and instance placement.
    Height,
    /// Splat (control) map resolution.
    Control,
    /// Detail density resolution.
    Detail,
}

impl ChannelClass {
    pub const ALL: [ChannelClass; 3] = [
        ChannelClass::Height,
        ChannelClass::Control,
        ChannelClass::Detail,
    ];
}

/// Axis-aligned world rectangle on the XZ plane, stored as `(x, z)` in a [`Vec2`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl WorldRect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_half_extent(center: Vec2, half_extent: Vec2) -> Self {
        Self::new(center - half_extent, center + half_extent)
    }

    pub fn from_origin_size(origin: Vec2, size: Vec2) -> Self {
        Self::new(origin, origin + size)
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn area(&self) -> f32 {
        let s = self.size();
        s.x * s.y
    }

    /// Whether both rectangles share a region of positive area.
    pub fn intersects(&self, other: &WorldRect) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn intersection(&self, other: &WorldRect) -> Option<WorldRect> {
        if !self.intersects(other) {
            return None;
        }
        Some(WorldRect {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        })
    }

    /// Half-open containment: `min <= p < max`.
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }

    /// Shrinks every side by `amount`, collapsing to the center if the rectangle is too small.
    pub fn shrink(&self, amount: f32) -> WorldRect {
        let half = (self.size() * 0.5 - Vec2::splat(amount)).max(Vec2::ZERO);
        WorldRect::from_center_half_extent(self.center(), half)
    }
}

/// Rectangle of pixels, `[x, x + width) × [y, y + height)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, ix: usize, iy: usize) -> bool {
        ix >= self.x && iy >= self.y && ix < self.x + self.width && iy < self.y + self.height
    }

    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    pub fn y_end(&self) -> usize {
        self.y + self.height
    }
}

/// A rectangular block of cell-centered pixels in world space.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct CanvasGrid {
    /// World position of the lower corner of pixel `(0, 0)`.
    pub origin: Vec2,
    /// Pixel edge length in world units.
    pub cell_size: f32,
    pub width: usize,
    pub height: usize,
}

impl CanvasGrid {
    pub fn new(origin: Vec2, cell_size: f32, width: usize, height: usize) -> Self {
        debug_assert!(cell_size > 0.0, "cell_size must be > 0");
        Self {
            origin,
            cell_size,
            width,
            height,
        }
    }

    /// A grid covering `bounds` with `resolution × resolution` pixels.
    pub fn covering(bounds: WorldRect, resolution: u32) -> Self {
        let resolution = resolution.max(1) as usize;
        let cell_size = bounds.size().x / resolution as f32;
        Self::new(bounds.min, cell_size, resolution, resolution)
    }

    /// The pixels of the lattice anchored at `lattice_origin` whose centers lie in `rect`.
    pub fn snapped(lattice_origin: Vec2, cell_size: f32, rect: WorldRect) -> Self {
        let first = ((rect.min - lattice_origin) / cell_size - 0.5).ceil();
        let end = ((rect.max - lattice_origin) / cell_size - 0.5).ceil();
        let width = (end.x - first.x).max(1.0) as usize;
        let height = (end.y - first.y).max(1.0) as usize;
        Self::new(lattice_origin + first * cell_size, cell_size, width, height)
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn world_rect(&self) -> WorldRect {
        WorldRect::from_origin_size(
            self.origin,
            Vec2::new(self.width as f32, self.height as f32) * self.cell_size,
        )
    }

    pub fn full_rect(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }

    #[inline]
    pub fn index(&self, ix: usize, iy: usize) -> usize {
        iy * self.width + ix
    }

    /// World position of the center of pixel `(ix, iy)`.
    #[inline]
    pub fn index_to_world(&self, ix: usize, iy: usize) -> Vec2 {
        self.origin + (Vec2::new(ix as f32, iy as f32) + 0.5) * self.cell_size
    }

    /// Pixel containing `p`; may lie outside the grid.
    #[inline]
    pub fn world_to_index(&self, p: Vec2) -> (isize, isize) {
        let rel = (p - self.origin) / self.cell_size;
        (rel.x.floor() as isize, rel.y.floor() as isize)
    }

    /// Pixel containing `p`, clamped into the grid.
    #[inline]
    pub fn world_to_index_clamped(&self, p: Vec2) -> (usize, usize) {
        let (ix, iy) = self.world_to_index(p);
        (
            ix.clamp(0, self.width.saturating_sub(1) as isize) as usize,
            iy.clamp(0, self.height.saturating_sub(1) as isize) as usize,
        )
    }

    /// Pixels whose centers lie in the half-open `rect`.
    pub fn pixel_span(&self, rect: &WorldRect) -> PixelRect {
        let first = ((rect.min - self.origin) / self.cell_size - 0.5).ceil();
        let end = ((rect.max - self.origin) / self.cell_size - 0.5).ceil();
        let x0 = first.x.clamp(0.0, self.width as f32) as usize;
        let y0 = first.y.clamp(0.0, self.height as f32) as usize;
        let x1 = end.x.clamp(0.0, self.width as f32) as usize;
        let y1 = end.y.clamp(0.0, self.height as f32) as usize;
        PixelRect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}
