//! Raster storage for canvas and tile channels.
//!
//! Stores scalar samples over a cell-centered [`CanvasGrid`]. Workspaces stitch tile rasters
//! into canvases and copy canvas regions back; [`pool`] recycles the underlying buffers.
pub mod grid;
pub mod pool;

use glam::Vec2;

pub use grid::{CanvasGrid, ChannelClass, PixelRect, WorldRect};
pub use pool::{BufferPool, PoolStats, PooledRaster};

/// A raster grid with floating point values and a canvas grid for spatial reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub grid: CanvasGrid,
    pub data: Vec<f32>,
}

impl Raster {
    /// Create a new raster with the given grid, initializing all values to zero.
    pub fn new(grid: CanvasGrid) -> Self {
        Self::filled(grid, 0.0)
    }

    pub fn filled(grid: CanvasGrid, value: f32) -> Self {
        let len = grid.len();
        Self {
            grid,
            data: vec![value; len],
        }
    }

    /// Wraps existing samples. Missing samples are zero-filled and extra samples dropped.
    pub fn from_data(grid: CanvasGrid, mut data: Vec<f32>) -> Self {
        data.resize(grid.len(), 0.0);
        Self { grid, data }
    }

    /// Get the size of the raster as `(width, height)`.
    pub fn size(&self) -> (usize, usize) {
        (self.grid.width, self.grid.height)
    }

    /// Get the value at the given grid indices, returning `0.0` if out of bounds.
    pub fn get(&self, ix: isize, iy: isize) -> f32 {
        let (w, h) = self.size();
        if ix < 0 || iy < 0 || ix >= w as isize || iy >= h as isize {
            return 0.0;
        }
        self.data[(iy as usize) * w + (ix as usize)]
    }

    #[inline]
    pub fn at(&self, ix: usize, iy: usize) -> f32 {
        self.data[self.grid.index(ix, iy)]
    }

    #[inline]
    pub fn set(&mut self, ix: usize, iy: usize, value: f32) {
        let i = self.grid.index(ix, iy);
        self.data[i] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Sample the pixel containing `p`, `0.0` outside the raster.
    pub fn sample_nearest(&self, p: Vec2) -> f32 {
        let (ix, iy) = self.grid.world_to_index(p);
        self.get(ix, iy)
    }

    /// Bilinear sample between pixel centers, clamped at the edges.
    pub fn sample_bilinear(&self, p: Vec2) -> f32 {
        let (w, h) = self.size();
        if w == 0 || h == 0 {
            return 0.0;
        }
        let rel = (p - self.grid.origin) / self.grid.cell_size - 0.5;
        let max_x = (w - 1) as f32;
        let max_y = (h - 1) as f32;
        let u = rel.x.clamp(0.0, max_x);
        let v = rel.y.clamp(0.0, max_y);
        let x0 = u.floor() as usize;
        let y0 = v.floor() as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let tx = u - x0 as f32;
        let ty = v - y0 as f32;
        let top = self.at(x0, y0) * (1.0 - tx) + self.at(x1, y0) * tx;
        let bottom = self.at(x0, y1) * (1.0 - tx) + self.at(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// `(min, max)` over all samples, `(0, 0)` for an empty raster.
    pub fn min_max(&self) -> (f32, f32) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Clamps every sample to `[0, 1]`; NaN becomes 0.
    pub fn clamp01(&mut self) {
        for v in &mut self.data {
            *v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        }
    }

    /// Copies `region` of `src` into this raster at `(dst_x, dst_y)`.
    pub fn copy_region_from(&mut self, src: &Raster, region: PixelRect, dst_x: usize, dst_y: usize) {
        for row in 0..region.height {
            let sy = region.y + row;
            let dy = dst_y + row;
            if sy >= src.grid.height || dy >= self.grid.height {
                break;
            }
            let width = region
                .width
                .min(src.grid.width.saturating_sub(region.x))
                .min(self.grid.width.saturating_sub(dst_x));
            let s = src.grid.index(region.x, sy);
            let d = self.grid.index(dst_x, dy);
            self.data[d..d + width].copy_from_slice(&src.data[s..s + width]);
        }
    }

    /// Whether any sample inside `region` is strictly greater than `threshold`.
    pub fn any_above(&self, region: PixelRect, threshold: f32) -> bool {
        (region.y..region.y_end().min(self.grid.height)).any(|iy| {
            let start = self.grid.index(region.x, iy);
            let end = self.grid.index(region.x_end().min(self.grid.width), iy);
            self.data[start..end].iter().any(|&v| v > threshold)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_grid() -> CanvasGrid {
        CanvasGrid::new(Vec2::ZERO, 1.0, 4, 4)
    }

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn new_initializes_with_zeroes() {
        let raster = Raster::new(make_grid());
        assert_eq!(raster.size(), (4, 4));
        assert!(raster.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn get_returns_zero_outside_bounds() {
        let raster = Raster::filled(make_grid(), 1.0);
        assert_eq!(raster.get(-1, -1), 0.0);
        assert_eq!(raster.get(10, 10), 0.0);
        assert_eq!(raster.get(3, 3), 1.0);
    }

    #[test]
    fn sample_nearest_uses_containing_pixel() {
        let mut raster = Raster::new(make_grid());
        raster.set(2, 1, 0.75);
        assert_eq!(raster.sample_nearest(Vec2::new(2.9, 1.1)), 0.75);
        assert_eq!(raster.sample_nearest(Vec2::new(1.9, 1.1)), 0.0);
    }

    #[test]
    fn bilinear_interpolates_between_centers() {
        let mut raster = Raster::new(make_grid());
        raster.set(0, 0, 0.0);
        raster.set(1, 0, 1.0);
        assert!(approx_eq(raster.sample_bilinear(Vec2::new(1.0, 0.5)), 0.5));
        assert!(approx_eq(raster.sample_bilinear(Vec2::new(1.5, 0.5)), 1.0));
        // Clamped before the first center.
        assert!(approx_eq(raster.sample_bilinear(Vec2::new(-3.0, 0.5)), 0.0));
    }

    #[test]
    fn copy_region_and_threshold() {
        let mut src = Raster::new(make_grid());
        src.set(1, 1, 0.9);
        let mut dst = Raster::new(CanvasGrid::new(Vec2::ZERO, 1.0, 2, 2));
        dst.copy_region_from(&src, PixelRect::new(1, 1, 2, 2), 0, 0);
        assert_eq!(dst.at(0, 0), 0.9);
        assert!(dst.any_above(PixelRect::new(0, 0, 1, 1), 0.5));
        assert!(!dst.any_above(PixelRect::new(1, 0, 1, 2), 0.5));
        assert!(!src.any_above(PixelRect::new(1, 1, 1, 1), 0.9));
    }

    #[test]
    fn min_max_and_from_data_padding() {
        let r = Raster::from_data(CanvasGrid::new(Vec2::ZERO, 1.0, 2, 2), vec![3.0, -1.0]);
        assert_eq!(r.data.len(), 4);
        assert_eq!(r.min_max(), (-1.0, 3.0));
    }
}
