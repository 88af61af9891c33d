//! Commit phase: write a rule's density field into the affected tiles.
//!
//! Texture and Detail rules modify the stitched canvases and write them back. Point-placed
//! rules run [`place_instances`] over the cell square and append the results to the tiles
//! containing them. WorldBiomeMask rules bake the field itself.
use super::events::EventSink;
use super::placement::{
    place_instances, ExtensionHandler, PlacementInputs, PlacementStamp, COLLIDER_MASK_PREFIX,
};
use super::random::RandomStream;
use super::rule::{SpawnMode, SpawnRule};
use super::simulate::AffectedSet;
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::mask::{Curve, TextureRegistry};
use crate::raster::{PixelRect, Raster, WorldRect};
use crate::resource::{PrototypeRegistry, ResourceType};
use crate::tiles::TileStore;
use crate::workspace::Workspace;

/// Upper bound of a detail density pixel.
pub const MAX_DETAIL_DENSITY: f32 = 16.0;

/// Mutable state a commit writes through.
pub struct CommitContext<'a> {
    pub store: &'a mut dyn TileStore,
    pub cache: &'a mut DataCache,
    pub workspace: &'a mut Workspace,
    /// Receives every placed Extension instance.
    pub extensions: Option<&'a mut dyn ExtensionHandler>,
    pub sink: &'a mut dyn EventSink,
}

/// Spawner-level settings a commit reads.
#[derive(Clone, Copy, Debug)]
pub struct CommitSettings<'a> {
    pub spawner_mode: SpawnMode,
    pub distance_curve: &'a Curve,
}

/// What a commit wrote.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub tiles_written: usize,
    pub instances_placed: usize,
    /// Prototypes registered on tiles that lacked them.
    pub registrations: usize,
    /// Lattice candidates tested by point placement.
    pub candidates: usize,
    /// Whether point placement stopped at the rule's instance cap.
    pub capped: bool,
}

fn check_field(workspace: &Workspace, rule: &SpawnRule, field: &Raster) -> Result<()> {
    let layout = workspace.layout(rule.resource_type.channel_class());
    if field.grid != layout.grid {
        return Err(Error::InvalidConfig(format!(
            "field of rule '{}' is not laid out on the {:?} canvas",
            rule.name, layout.class
        )));
    }
    Ok(())
}

/// Canvas rectangles of the affected tiles on the rule's canvas.
fn affected_rects(
    workspace: &Workspace,
    rule: &SpawnRule,
    affected: &AffectedSet,
) -> Vec<PixelRect> {
    workspace
        .layout(rule.resource_type.channel_class())
        .regions
        .iter()
        .filter(|r| affected.is_affected(r.tile))
        .map(|r| r.canvas_rect)
        .collect()
}

/// Canvas indices in `rects` whose field value exceeds `min_fitness`, with that value.
fn fit_pixels<'f>(
    field: &'f Raster,
    rects: &'f [PixelRect],
    min_fitness: f32,
) -> impl Iterator<Item = (usize, f32)> + 'f {
    rects.iter().flat_map(move |rect| {
        (rect.y..rect.y_end()).flat_map(move |iy| {
            (rect.x..rect.x_end()).filter_map(move |ix| {
                let i = field.grid.index(ix, iy);
                let f = field.data[i];
                (f > min_fitness).then_some((i, f))
            })
        })
    })
}

/// Raises layer `target` at pixel `i` toward 1 by `d` and rescales the other layers so the
/// weights sum to 1.
pub(crate) fn blend_splat<L>(layers: &mut [L], target: usize, i: usize, d: f32)
where
    L: std::ops::DerefMut<Target = Raster>,
{
    let t = layers[target].data[i].clamp(0.0, 1.0);
    let mut raised = t + (1.0 - t) * d.clamp(0.0, 1.0);
    let rest = 1.0 - raised;
    let others: f32 = layers
        .iter()
        .enumerate()
        .filter(|(l, _)| *l != target)
        .map(|(_, r)| r.data[i].max(0.0))
        .sum();
    if others > f32::EPSILON {
        let k = rest / others;
        for (l, layer) in layers.iter_mut().enumerate() {
            if l != target {
                layer.data[i] = layer.data[i].max(0.0) * k;
            }
        }
    } else if target != 0 {
        layers[0].data[i] = rest;
    } else {
        raised = 1.0;
    }
    layers[target].data[i] = raised;
}

pub(crate) fn commit_texture(
    ctx: &mut CommitContext<'_>,
    registry: &dyn PrototypeRegistry,
    rule: &SpawnRule,
    field: &Raster,
    affected: &AffectedSet,
) -> Result<CommitOutcome> {
    check_field(&*ctx.workspace, rule, field)?;
    let target = rule.resource_index;
    ctx.workspace.ensure_splat_layers(target + 1);
    let rects = affected_rects(&*ctx.workspace, rule, affected);
    let layers = ctx.workspace.splatmaps_mut();
    for (i, f) in fit_pixels(field, &rects, rule.min_fitness) {
        blend_splat(layers, target, i, f * rule.strength);
    }
    let report = ctx
        .workspace
        .set_splatmap(ctx.store, ctx.cache, Some(registry), affected)?;
    Ok(CommitOutcome {
        tiles_written: report.tiles_written,
        registrations: report.registrations,
        ..Default::default()
    })
}

/// Adds the rule's density to its detail layer. Non-additive only when the rule itself runs in
/// Replace mode; the engine forces Add before calling this.
pub(crate) fn commit_detail(
    ctx: &mut CommitContext<'_>,
    registry: &dyn PrototypeRegistry,
    settings: CommitSettings<'_>,
    rule: &SpawnRule,
    field: &Raster,
    affected: &AffectedSet,
) -> Result<CommitOutcome> {
    check_field(&*ctx.workspace, rule, field)?;
    let layer = rule.resource_index;
    let additive = rule.effective_mode(settings.spawner_mode) == SpawnMode::Add;
    ctx.workspace.ensure_detail_layers(layer + 1);
    let rects = affected_rects(&*ctx.workspace, rule, affected);
    let canvas = ctx
        .workspace
        .detail_mut(layer)
        .ok_or_else(|| Error::InvalidConfig(format!("detail layer {layer} is unavailable")))?;
    for (i, f) in fit_pixels(field, &rects, rule.min_fitness) {
        let d = f * rule.strength;
        let v = if additive { canvas.data[i] + d } else { d };
        canvas.data[i] = v.clamp(0.0, MAX_DETAIL_DENSITY);
    }
    let report = ctx.workspace.set_terrain_details(
        ctx.store,
        ctx.cache,
        Some(registry),
        layer,
        affected,
    )?;
    Ok(CommitOutcome {
        tiles_written: report.tiles_written,
        registrations: report.registrations,
        ..Default::default()
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn commit_instances(
    ctx: &mut CommitContext<'_>,
    registry: &dyn PrototypeRegistry,
    textures: &TextureRegistry,
    settings: CommitSettings<'_>,
    rule: &mut SpawnRule,
    field: &Raster,
    affected: &AffectedSet,
    rng: &mut RandomStream,
) -> Result<CommitOutcome> {
    check_field(&*ctx.workspace, rule, field)?;
    let resource_type = rule.resource_type;
    let descriptor = registry.lookup(resource_type, rule.resource_index);
    let stamp = PlacementStamp {
        identity: rule.identity(registry),
        tag: descriptor
            .as_ref()
            .map_or_else(|| rule.name.clone(), |d| d.name.clone()),
        radius: descriptor.as_ref().map_or(0.0, |d| d.radius),
    };
    let targets: Vec<WorldRect> = affected
        .affected_tiles()
        .filter_map(|tile| ctx.store.tile(tile).map(|t| t.bounds()))
        .collect();

    let result = {
        let workspace = &*ctx.workspace;
        let spatial = ctx.cache.spatial_index(&*ctx.store, workspace.tile_ids());
        let colliders: Vec<&Raster> = workspace
            .baked_mask_names()
            .filter(|name| name.starts_with(COLLIDER_MASK_PREFIX))
            .filter_map(|name| workspace.baked_mask(name))
            .collect();
        let inputs = PlacementInputs {
            square: workspace.square(),
            center: workspace.center(),
            range: workspace.range(),
            field,
            heights: workspace.heightmap(),
            targets: &targets,
            distance_curve: settings.distance_curve,
            textures,
            spatial,
            colliders,
        };
        place_instances(&inputs, rule, &stamp, rng)
    };

    if resource_type == ResourceType::Extension {
        if let Some(handler) = ctx.extensions.as_deref_mut() {
            for instance in &result.placements {
                handler.on_instance(rule, instance);
            }
        }
    }

    let placed = result.placements.len();
    let report = ctx.workspace.set_instances(
        ctx.store,
        ctx.cache,
        Some(registry),
        resource_type,
        result.placements,
        affected,
    )?;
    Ok(CommitOutcome {
        tiles_written: report.tiles_written,
        instances_placed: placed,
        registrations: report.registrations,
        candidates: result.candidates,
        capped: result.capped,
    })
}

pub(crate) fn commit_biome_mask(
    ctx: &mut CommitContext<'_>,
    rule: &SpawnRule,
    field: &Raster,
    affected: &AffectedSet,
) -> Result<CommitOutcome> {
    let report = ctx
        .workspace
        .set_baked_mask(ctx.store, ctx.cache, &rule.name, field, affected)?;
    Ok(CommitOutcome {
        tiles_written: report.tiles_written,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::raster::CanvasGrid;

    fn layers(values: &[f32]) -> Vec<Box<Raster>> {
        values
            .iter()
            .map(|v| Box::new(Raster::filled(CanvasGrid::new(Vec2::ZERO, 1.0, 1, 1), *v)))
            .collect()
    }

    fn weights(layers: &[Box<Raster>]) -> Vec<f32> {
        layers.iter().map(|l| l.data[0]).collect()
    }

    fn approx(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn blend_raises_target_and_renormalizes() {
        let mut l = layers(&[0.6, 0.4, 0.0]);
        blend_splat(&mut l, 2, 0, 0.5);
        let w = weights(&l);
        assert!(approx(&w, &[0.3, 0.2, 0.5]), "{w:?}");
        assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn blend_on_empty_pixel_moves_rest_to_base_layer() {
        let mut l = layers(&[0.0, 0.0]);
        blend_splat(&mut l, 1, 0, 0.25);
        assert!(approx(&weights(&l), &[0.75, 0.25]));

        let mut single = layers(&[0.2]);
        blend_splat(&mut single, 0, 0, 0.1);
        assert!(approx(&weights(&single), &[1.0]));
    }

    #[test]
    fn full_strength_saturates_target() {
        let mut l = layers(&[0.5, 0.5]);
        blend_splat(&mut l, 0, 0, 1.0);
        assert!(approx(&weights(&l), &[1.0, 0.0]));
    }
}
