//! Splitting a spawn area into workspace-sized cells.
use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::WorldRect;
use crate::spawn::Spawner;

/// Axis-aligned world area to spawn over.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnArea {
    pub center: Vec2,
    pub size: Vec2,
}

impl SpawnArea {
    pub fn new(center: Vec2, size: Vec2) -> Self {
        Self { center, size }
    }

    /// The area covering `rect`.
    pub fn from_rect(rect: WorldRect) -> Self {
        Self {
            center: rect.center(),
            size: rect.size(),
        }
    }

    pub fn rect(&self) -> WorldRect {
        WorldRect::from_center_half_extent(self.center, self.size * 0.5)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.size.is_finite() || self.size.min_element() <= 0.0 {
            return Err(Error::InvalidConfig(
                "spawn area size must be > 0 in both components".into(),
            ));
        }
        if !self.center.is_finite() {
            return Err(Error::InvalidConfig("spawn area center must be finite".into()));
        }
        Ok(())
    }
}

/// One workspace-sized cell of an area pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellPlan {
    /// Position in raster order.
    pub index: usize,
    pub center: Vec2,
    /// Half the side of the cell square.
    pub range: f32,
}

impl CellPlan {
    pub fn square(&self) -> WorldRect {
        WorldRect::from_center_half_extent(self.center, Vec2::splat(self.range))
    }
}

/// Cells covering `area` for spawners reaching at most `max_range`.
///
/// Cells have range `min(max_range, smaller side / 2)`. An area that fits into one cell of
/// that range is run as a single cell centered on the area. Larger areas are walked in raster
/// order, outer loop along z, with cells spaced twice the range apart. Returns no cells for a
/// degenerate area or range.
pub fn plan_cells(area: &SpawnArea, max_range: f32) -> Vec<CellPlan> {
    if area.validate().is_err() || max_range.is_nan() || max_range <= 0.0 {
        return Vec::new();
    }
    let range = max_range.min(area.size.min_element() * 0.5);
    if area.size.max_element() <= 2.0 * range {
        return vec![CellPlan {
            index: 0,
            center: area.center,
            range,
        }];
    }

    let step = 2.0 * range;
    let columns = (area.size.x / step).ceil() as usize;
    let rows = (area.size.y / step).ceil() as usize;
    let min = area.center - area.size * 0.5;

    let mut cells = Vec::with_capacity(columns * rows);
    for z in 0..rows {
        for x in 0..columns {
            cells.push(CellPlan {
                index: cells.len(),
                center: min + Vec2::splat(range) + Vec2::new(x as f32, z as f32) * step,
                range,
            });
        }
    }
    cells
}

/// Progress steps of an area pass: cells times active rules that write tile content.
///
/// WorldBiomeMask rules do not count.
pub fn area_spawn_steps(area: &SpawnArea, spawners: &[Spawner], max_range: f32) -> usize {
    let rules: usize = spawners.iter().map(Spawner::step_rule_count).sum();
    plan_cells(area, max_range).len() * rules
}
