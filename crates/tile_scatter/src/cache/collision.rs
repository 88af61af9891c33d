//! Baked occupancy rasters for collision masks.
//!
//! A pixel is occupied (`1.0`) when a tile baked mask named after one of the tags is set at the
//! pixel center, or when the center falls inside the footprint of an instance carrying one of
//! the tags, grown by the requested radius.
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use glam::Vec2;

use super::spatial::SpatialIndex;
use crate::raster::{CanvasGrid, Raster};
use crate::tiles::{ChannelKind, TileId, TileStore};

/// Baked masks count as occupied above this value.
pub const BAKED_MASK_THRESHOLD: f32 = 0.5;

/// Cache of occupancy rasters keyed by tags, radius and canvas.
#[derive(Debug, Default)]
pub struct CollisionCache {
    entries: HashMap<u64, Raster>,
}

impl CollisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the cached occupancy, baking it first on a miss. The flag reports a hit.
    pub fn get_or_bake(
        &mut self,
        store: &dyn TileStore,
        spatial: &SpatialIndex,
        grid: &CanvasGrid,
        tiles: &[TileId],
        tags: &[String],
        radius: f32,
    ) -> (&Raster, bool) {
        let key = fingerprint(grid, tags, radius);
        let hit = self.entries.contains_key(&key);
        let raster = self
            .entries
            .entry(key)
            .or_insert_with(|| bake_occupancy(store, spatial, grid, tiles, tags, radius));
        (raster, hit)
    }
}

fn fingerprint(grid: &CanvasGrid, tags: &[String], radius: f32) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut sorted: Vec<&String> = tags.iter().collect();
    sorted.sort();
    sorted.dedup();
    sorted.hash(&mut hasher);
    radius.to_bits().hash(&mut hasher);
    grid.origin.x.to_bits().hash(&mut hasher);
    grid.origin.y.to_bits().hash(&mut hasher);
    grid.cell_size.to_bits().hash(&mut hasher);
    grid.width.hash(&mut hasher);
    grid.height.hash(&mut hasher);
    hasher.finish()
}

/// Rasterizes occupancy for `tags` onto `grid`.
pub fn bake_occupancy(
    store: &dyn TileStore,
    spatial: &SpatialIndex,
    grid: &CanvasGrid,
    tiles: &[TileId],
    tags: &[String],
    radius: f32,
) -> Raster {
    let mut out = Raster::new(grid.clone());

    for &id in tiles {
        let Some(tile) = store.tile(id) else {
            continue;
        };
        let bounds = tile.bounds();
        for tag in tags {
            let Some(mask) = tile.read_channel(&ChannelKind::BakedMask(tag.clone())) else {
                continue;
            };
            let span = grid.pixel_span(&bounds);
            for iy in span.y..span.y_end() {
                for ix in span.x..span.x_end() {
                    let p = grid.index_to_world(ix, iy);
                    if mask.sample_nearest(p) > BAKED_MASK_THRESHOLD {
                        out.set(ix, iy, 1.0);
                    }
                }
            }
        }
    }

    let radius = radius.max(0.0);
    for entry in spatial.entries_for(tags) {
        stamp_disk(&mut out, entry.position, entry.radius + radius);
    }
    out
}

fn stamp_disk(out: &mut Raster, center: Vec2, radius: f32) {
    let grid = out.grid.clone();
    let (x0, y0) = grid.world_to_index(center - Vec2::splat(radius));
    let (x1, y1) = grid.world_to_index(center + Vec2::splat(radius));
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(grid.width as isize - 1);
    let y1 = y1.min(grid.height as isize - 1);
    let r2 = radius * radius;
    for iy in y0..=y1 {
        for ix in x0..=x1 {
            let p = grid.index_to_world(ix as usize, iy as usize);
            if p.distance_squared(center) <= r2 {
                out.set(ix as usize, iy as usize, 1.0);
            }
        }
    }
}
