//! Simulate phase: which tiles a rule would touch.
//!
//! The test is a data-parallel threshold scan of the rule's density field over each tile's
//! canvas rectangle. It reads only the field and the workspace layout.
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use super::rule::SpawnRule;
use crate::error::{Error, Result};
use crate::raster::{PixelRect, Raster};
use crate::tiles::TileId;
use crate::workspace::Workspace;

/// Per-tile outcome of the simulate phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffectedSet {
    flags: Vec<(TileId, bool)>,
}

impl AffectedSet {
    /// Pairs tiles with flags in order. Extra entries on either side are ignored.
    pub fn from_flags(
        tiles: impl IntoIterator<Item = TileId>,
        flags: impl IntoIterator<Item = bool>,
    ) -> Self {
        Self {
            flags: tiles.into_iter().zip(flags).collect(),
        }
    }

    /// Every tile affected.
    pub fn all(tiles: impl IntoIterator<Item = TileId>) -> Self {
        Self {
            flags: tiles.into_iter().map(|t| (t, true)).collect(),
        }
    }

    pub fn is_affected(&self, tile: TileId) -> bool {
        self.flags.iter().any(|(t, hit)| *t == tile && *hit)
    }

    pub fn affected_tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.flags.iter().filter(|(_, hit)| *hit).map(|(t, _)| *t)
    }

    pub fn affected_count(&self) -> usize {
        self.flags.iter().filter(|(_, hit)| *hit).count()
    }

    pub fn any(&self) -> bool {
        self.flags.iter().any(|(_, hit)| *hit)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, bool)> + '_ {
        self.flags.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Threshold test run over canvas regions.
///
/// Implementations return one flag per region, `true` when any sample in the region is
/// strictly greater than `threshold`. Callers block on the result.
pub trait ParallelEvaluate: Send + Sync {
    fn threshold_regions(&self, field: &Raster, regions: &[PixelRect], threshold: f32) -> Vec<bool>;
}

/// Scans rows of all regions on a rayon thread pool.
#[derive(Clone, Debug, Default)]
pub struct RayonEvaluator {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonEvaluator {
    /// Uses rayon's global pool.
    pub const fn new() -> Self {
        Self { pool: None }
    }

    /// Uses a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tile-scatter-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("failed to build thread pool: {e}")))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    fn scan(field: &Raster, regions: &[PixelRect], threshold: f32) -> Vec<bool> {
        regions
            .par_iter()
            .map(|region| {
                let rows = region.y..region.y_end().min(field.grid.height);
                rows.into_par_iter().any(|iy| {
                    let row = PixelRect::new(region.x, iy, region.width, 1);
                    field.any_above(row, threshold)
                })
            })
            .collect()
    }
}

impl ParallelEvaluate for RayonEvaluator {
    fn threshold_regions(&self, field: &Raster, regions: &[PixelRect], threshold: f32) -> Vec<bool> {
        match &self.pool {
            Some(pool) => pool.install(|| Self::scan(field, regions, threshold)),
            None => Self::scan(field, regions, threshold),
        }
    }
}

/// Single-threaded reference evaluator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialEvaluator;

impl ParallelEvaluate for SerialEvaluator {
    fn threshold_regions(&self, field: &Raster, regions: &[PixelRect], threshold: f32) -> Vec<bool> {
        regions
            .iter()
            .map(|region| field.any_above(*region, threshold))
            .collect()
    }
}

/// Flags each workspace tile whose part of `field` exceeds the rule's minimum fitness.
///
/// `field` must be laid out on the workspace canvas of the rule's channel class. Tiles without
/// a region on that canvas are unaffected.
pub fn simulate(
    evaluator: &dyn ParallelEvaluate,
    workspace: &Workspace,
    field: &Raster,
    rule: &SpawnRule,
) -> Result<AffectedSet> {
    let layout = workspace.layout(rule.resource_type.channel_class());
    if field.grid != layout.grid {
        return Err(Error::InvalidConfig(format!(
            "field of rule '{}' is not laid out on the {:?} canvas",
            rule.name, layout.class
        )));
    }
    let regions: Vec<PixelRect> = layout.regions.iter().map(|r| r.canvas_rect).collect();
    let flags = evaluator.threshold_regions(field, &regions, rule.min_fitness);
    if flags.len() != regions.len() {
        return Err(Error::SimulationReadbackMismatch {
            rule: rule.name.clone(),
            expected: regions.len(),
            actual: flags.len(),
        });
    }

    let affected = AffectedSet::from_flags(
        workspace.tile_ids().iter().copied(),
        workspace.tile_ids().iter().map(|&tile| {
            layout
                .regions
                .iter()
                .position(|r| r.tile == tile)
                .is_some_and(|i| flags[i])
        }),
    );
    debug!(
        "Rule '{}' affects {} of {} tile(s).",
        rule.name,
        affected.affected_count(),
        affected.len()
    );
    Ok(affected)
}
