//! Ordered mask pipelines folded into a density field.
use std::sync::Arc;

use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::distance::normalized_distance_into;
use super::node::{band, BlendMode, InfluenceScope, MaskNode, MaskOperation};
use super::noise::fill_noise;
use super::texture::TextureRegistry;
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::raster::{BufferPool, CanvasGrid, PooledRaster, Raster};
use crate::spawn::events::{EventSink, SpawnEvent, SpawnEventKind};
use crate::tiles::{TileId, TileStore};

/// Collision inputs: the tiles of the workspace and the cache baking their occupancy.
pub struct CollisionInputs<'a> {
    pub store: &'a dyn TileStore,
    pub cache: &'a mut DataCache,
    pub tiles: &'a [TileId],
}

/// Everything mask operations read while evaluating on a canvas.
pub struct MaskContext<'a> {
    /// Workspace center, origin of [`InfluenceScope::Local`] coordinates.
    pub center: Vec2,
    pub scope: InfluenceScope,
    /// Stitched heights on the height canvas.
    pub heights: Option<&'a Raster>,
    /// Slope in degrees on the height canvas.
    pub slopes: Option<&'a Raster>,
    /// Stitched splat weights on the control canvas, by layer.
    pub splats: Vec<&'a Raster>,
    pub textures: &'a TextureRegistry,
    pub collisions: Option<CollisionInputs<'a>>,
    /// Output of the enclosing stack, injected by passthrough nodes.
    pub parent: Option<&'a Raster>,
    /// Lends the accumulator and scratch rasters of every evaluation.
    pub pool: Arc<BufferPool>,
}

impl<'a> MaskContext<'a> {
    pub fn new(center: Vec2, textures: &'a TextureRegistry) -> Self {
        Self {
            center,
            scope: InfluenceScope::Global,
            heights: None,
            slopes: None,
            splats: Vec::new(),
            textures,
            collisions: None,
            parent: None,
            pool: Arc::new(BufferPool::new()),
        }
    }

    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_scope(mut self, scope: InfluenceScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_heights(mut self, heights: &'a Raster, slopes: &'a Raster) -> Self {
        self.heights = Some(heights);
        self.slopes = Some(slopes);
        self
    }

    pub fn with_splats(mut self, splats: Vec<&'a Raster>) -> Self {
        self.splats = splats;
        self
    }

    pub fn with_collisions(mut self, collisions: CollisionInputs<'a>) -> Self {
        self.collisions = Some(collisions);
        self
    }

    fn origin(&self) -> Vec2 {
        match self.scope {
            InfluenceScope::Global => Vec2::ZERO,
            InfluenceScope::Local => self.center,
        }
    }
}

/// Result of a stack evaluation.
#[derive(Debug)]
pub struct MaskOutput {
    /// Density in `[0, 1]` on the evaluation grid, lent from the context's pool.
    pub field: PooledRaster,
    /// Whether an active passthrough node injected the parent field.
    pub passthrough: bool,
}

/// An ordered list of mask nodes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaskStack {
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub nodes: Vec<MaskNode>,
}

impl MaskStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: MaskNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn push(&mut self, node: MaskNode) {
        self.nodes.push(node);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| !n.active)
    }

    /// Whether an active node injects the parent field.
    pub fn uses_passthrough(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.active && n.operation == MaskOperation::GlobalPassthrough)
    }

    /// Rejects node parameters that would produce non-finite densities.
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            let invalid = |what: &str| {
                Err(Error::InvalidConfig(format!(
                    "mask stack '{}': {what} must be finite",
                    self.name
                )))
            };
            match &node.operation {
                MaskOperation::Noise(params) => params.validate().map_err(|err| {
                    Error::InvalidConfig(format!("mask stack '{}': {err}", self.name))
                })?,
                MaskOperation::Constant { value } if !value.is_finite() => {
                    return invalid("constant value")
                }
                MaskOperation::Height { min, max, falloff }
                    if !(min.is_finite() && max.is_finite() && falloff.is_finite()) =>
                {
                    return invalid("height band")
                }
                MaskOperation::Slope {
                    min_degrees,
                    max_degrees,
                    falloff_degrees,
                } if !(min_degrees.is_finite()
                    && max_degrees.is_finite()
                    && falloff_degrees.is_finite()) =>
                {
                    return invalid("slope band")
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Forces the first active node to [`BlendMode::Multiply`]. Returns the mode it replaced.
    pub fn correct_first_blend(&mut self) -> Option<BlendMode> {
        let first = self.nodes.iter_mut().find(|n| n.active)?;
        if first.blend == BlendMode::Multiply {
            return None;
        }
        let found = first.blend;
        first.blend = BlendMode::Multiply;
        Some(found)
    }

    /// Folds every active node over a white canvas laid out on `grid`.
    ///
    /// Fails with [`Error::InvalidConfig`] on parameters rejected by [`MaskStack::validate`].
    /// The accumulator is clamped to `[0, 1]` after each fold. A first active node that is not
    /// Multiply is corrected in place, logged, and reported once per call as a warning event.
    pub fn evaluate(
        &mut self,
        grid: &CanvasGrid,
        ctx: &mut MaskContext<'_>,
        sink: &mut dyn EventSink,
    ) -> Result<MaskOutput> {
        let parent = ctx.parent;
        self.evaluate_with_parent(grid, ctx, parent, sink)
    }

    /// Like [`MaskStack::evaluate`], with `parent` feeding passthrough nodes instead of
    /// [`MaskContext::parent`].
    pub fn evaluate_with_parent(
        &mut self,
        grid: &CanvasGrid,
        ctx: &mut MaskContext<'_>,
        parent: Option<&Raster>,
        sink: &mut dyn EventSink,
    ) -> Result<MaskOutput> {
        self.validate()?;
        if let Some(found) = self.correct_first_blend() {
            let err = Error::MaskConfiguration {
                stack: self.name.clone(),
                found,
            };
            warn!("{err}; corrected to Multiply.");
            if sink.wants(SpawnEventKind::Warning) {
                sink.send(SpawnEvent::Warning {
                    context: self.name.clone(),
                    message: err.to_string(),
                });
            }
        }

        let mut acc = ctx.pool.acquire_filled(grid.clone(), 1.0);
        let mut values = ctx.pool.acquire(grid.clone());
        let mut passthrough = false;

        for node in self.nodes.iter().filter(|n| n.active) {
            if node.operation == MaskOperation::GlobalPassthrough {
                passthrough = true;
            }
            evaluate_operation(&node.operation, ctx, parent, &mut values);
            for (a, v) in acc.data.iter_mut().zip(values.data.iter()) {
                let v = if node.invert { 1.0 - *v } else { *v };
                *a = node.blend.apply(*a, v).clamp(0.0, 1.0);
            }
        }

        Ok(MaskOutput {
            field: acc,
            passthrough,
        })
    }
}

fn evaluate_operation(
    op: &MaskOperation,
    ctx: &mut MaskContext<'_>,
    parent: Option<&Raster>,
    out: &mut Raster,
) {
    let grid = out.grid.clone();
    match op {
        MaskOperation::Constant { value } => out.fill(value.clamp(0.0, 1.0)),
        MaskOperation::Height { min, max, falloff } => {
            let Some(heights) = ctx.heights else {
                warn!("Height mask evaluated without a heightmap.");
                out.fill(0.0);
                return;
            };
            let (lo, hi) = heights.min_max();
            let span = hi - lo;
            for iy in 0..grid.height {
                for ix in 0..grid.width {
                    let h = heights.sample_bilinear(grid.index_to_world(ix, iy));
                    let h = match ctx.scope {
                        InfluenceScope::Global => h,
                        InfluenceScope::Local if span > f32::EPSILON => (h - lo) / span,
                        InfluenceScope::Local => 0.0,
                    };
                    out.set(ix, iy, band(h, *min, *max, *falloff));
                }
            }
        }
        MaskOperation::Slope {
            min_degrees,
            max_degrees,
            falloff_degrees,
        } => {
            let Some(slopes) = ctx.slopes else {
                warn!("Slope mask evaluated without a normal map.");
                out.fill(0.0);
                return;
            };
            for iy in 0..grid.height {
                for ix in 0..grid.width {
                    let s = slopes.sample_bilinear(grid.index_to_world(ix, iy));
                    out.set(ix, iy, band(s, *min_degrees, *max_degrees, *falloff_degrees));
                }
            }
        }
        MaskOperation::Noise(params) => fill_noise(params, ctx.origin(), out),
        MaskOperation::Collision { tags, radius } => match ctx.collisions.as_mut() {
            Some(c) => {
                let occ = c.cache.collision_mask(c.store, &grid, c.tiles, tags, *radius);
                for (dst, o) in out.data.iter_mut().zip(occ.data.iter()) {
                    *dst = 1.0 - o.clamp(0.0, 1.0);
                }
            }
            None => out.fill(1.0),
        },
        MaskOperation::CollisionDistance { tags, max_distance } => {
            match ctx.collisions.as_mut() {
                Some(c) => {
                    let occ = c.cache.collision_mask(c.store, &grid, c.tiles, tags, 0.0);
                    normalized_distance_into(occ, *max_distance, out);
                }
                None => out.fill(1.0),
            }
        }
        MaskOperation::SplatLayer { layer } => match ctx.splats.get(*layer) {
            Some(splat) => {
                for iy in 0..grid.height {
                    for ix in 0..grid.width {
                        let w = splat.sample_nearest(grid.index_to_world(ix, iy));
                        out.set(ix, iy, w.clamp(0.0, 1.0));
                    }
                }
            }
            None => out.fill(0.0),
        },
        MaskOperation::Texture {
            texture_id,
            channel,
        } => {
            let origin = ctx.origin();
            for iy in 0..grid.height {
                for ix in 0..grid.width {
                    let p = grid.index_to_world(ix, iy) - origin;
                    let v = ctx.textures.sample(texture_id, *channel, p);
                    out.set(ix, iy, v.clamp(0.0, 1.0));
                }
            }
        }
        MaskOperation::GlobalPassthrough => match parent {
            Some(parent) if parent.grid == grid => out.data.copy_from_slice(&parent.data),
            Some(parent) => {
                for iy in 0..grid.height {
                    for ix in 0..grid.width {
                        out.set(ix, iy, parent.sample_nearest(grid.index_to_world(ix, iy)));
                    }
                }
            }
            None => out.fill(1.0),
        },
    }
}
