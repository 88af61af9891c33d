//! Multi-tile workspaces: one virtual canvas per channel class over a world square.
//!
//! A [`Workspace`] lives for one spawn invocation. It records which pixels of each
//! contributing tile land where on each canvas, pulls channels lazily through the
//! [`DataCache`], and writes canvas data back into the tiles simulate flagged as affected.
//! Canvas buffers come from a [`BufferPool`] and go back to it when the workspace is closed
//! or dropped.
pub mod layout;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec3Swizzles};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use layout::{CanvasLayout, TileRegion};

use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::mask::{CollisionInputs, InfluenceScope, MaskContext, TextureRegistry};
use crate::raster::{BufferPool, ChannelClass, PixelRect, PooledRaster, Raster, WorldRect};
use crate::resource::{InstanceKind, PlacedInstance, PrototypeRegistry, ResourceType};
use crate::spawn::AffectedSet;
use crate::tiles::{ChannelKind, Tile, TileId, TileScope, TileStore};

/// Parameters of [`Workspace::create`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceRequest {
    /// Tile whose lattice and scope the canvas follows. Defaults to the tile under `center`.
    pub center_tile: Option<TileId>,
    pub center: Vec2,
    /// Half the side of the square.
    pub range: f32,
    /// When `false`, only the center tile contributes.
    pub include_multi_tile: bool,
    /// Restricts contributing tiles by name.
    pub valid_tile_names: Option<Vec<String>>,
}

impl WorkspaceRequest {
    pub fn new(center: Vec2, range: f32) -> Self {
        Self {
            center_tile: None,
            center,
            range,
            include_multi_tile: true,
            valid_tile_names: None,
        }
    }

    pub fn with_center_tile(mut self, tile: TileId) -> Self {
        self.center_tile = Some(tile);
        self
    }

    pub fn with_multi_tile(mut self, include: bool) -> Self {
        self.include_multi_tile = include;
        self
    }

    pub fn with_valid_tile_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.valid_tile_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn square(&self) -> WorldRect {
        WorldRect::from_center_half_extent(self.center, Vec2::splat(self.range))
    }
}

/// What a write-back touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub tiles_written: usize,
    /// Prototypes registered on tiles to recover from missing resources.
    pub registrations: usize,
}

fn class_slot(class: ChannelClass) -> usize {
    match class {
        ChannelClass::Height => 0,
        ChannelClass::Control => 1,
        ChannelClass::Detail => 2,
    }
}

/// Stitched view over the tiles under one world square.
#[derive(Debug)]
pub struct Workspace {
    center: Vec2,
    range: f32,
    square: WorldRect,
    scope: TileScope,
    center_tile: TileId,
    tiles: Vec<TileId>,
    layouts: [CanvasLayout; 3],
    pool: Arc<BufferPool>,
    heights: Option<PooledRaster>,
    slopes: Option<PooledRaster>,
    normals: Option<Vec<Vec3>>,
    splats: Option<Vec<PooledRaster>>,
    details: Option<Vec<PooledRaster>>,
    trees: Option<Vec<PlacedInstance>>,
    game_objects: Option<Vec<PlacedInstance>>,
    baked_masks: Option<BTreeMap<String, PooledRaster>>,
    affected: HashMap<(ResourceType, TileId), bool>,
}

impl Workspace {
    /// Lays out the canvases for `request`.
    ///
    /// Fails with [`Error::TileUnavailable`] when no tile of the center tile's scope covers a
    /// pixel of the square.
    pub fn create(
        store: &dyn TileStore,
        request: WorkspaceRequest,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        if request.range.is_nan() || request.range <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "workspace range must be > 0, got {}",
                request.range
            )));
        }
        let square = request.square();
        let unavailable = || Error::TileUnavailable {
            center: request.center,
            range: request.range,
        };

        let center_tile = match request.center_tile {
            Some(id) => id,
            None => store
                .tile_at(request.center)
                .or_else(|| store.tiles_overlapping(square).into_iter().next())
                .ok_or_else(unavailable)?,
        };
        let anchor = store.tile(center_tile).ok_or(Error::UnknownTile(center_tile))?;
        let scope = anchor.scope();

        let candidates = if request.include_multi_tile {
            store.tiles_overlapping(square)
        } else if anchor.bounds().intersects(&square) {
            vec![center_tile]
        } else {
            Vec::new()
        };
        let accepted: Vec<TileId> = candidates
            .into_iter()
            .filter(|id| {
                store.tile(*id).is_some_and(|t| {
                    t.scope() == scope
                        && request
                            .valid_tile_names
                            .as_ref()
                            .is_none_or(|names| names.iter().any(|n| n == t.name()))
                })
            })
            .collect();

        let layouts = ChannelClass::ALL
            .map(|class| CanvasLayout::build(class, store, anchor, square, &accepted));
        let tiles: Vec<TileId> = accepted
            .into_iter()
            .filter(|id| layouts.iter().any(|l| l.region(*id).is_some()))
            .collect();
        if tiles.is_empty() {
            return Err(unavailable());
        }

        debug!(
            "Workspace at {} (range {}) spans {} tile(s).",
            request.center,
            request.range,
            tiles.len()
        );

        Ok(Self {
            center: request.center,
            range: request.range,
            square,
            scope,
            center_tile,
            tiles,
            layouts,
            pool,
            heights: None,
            slopes: None,
            normals: None,
            splats: None,
            details: None,
            trees: None,
            game_objects: None,
            baked_masks: None,
            affected: HashMap::new(),
        })
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    pub fn square(&self) -> WorldRect {
        self.square
    }

    pub fn scope(&self) -> TileScope {
        self.scope
    }

    pub fn center_tile(&self) -> TileId {
        self.center_tile
    }

    /// Contributing tiles, ordered by id.
    pub fn tile_ids(&self) -> &[TileId] {
        &self.tiles
    }

    pub fn layout(&self, class: ChannelClass) -> &CanvasLayout {
        &self.layouts[class_slot(class)]
    }

    fn stitch(
        &self,
        store: &dyn TileStore,
        cache: &mut DataCache,
        channel: &ChannelKind,
    ) -> PooledRaster {
        let layout = self.layout(channel.class());
        let mut canvas = self.pool.acquire(layout.grid.clone());
        for region in &layout.regions {
            if let Some(src) = cache.raster(store, region.tile, channel) {
                canvas.copy_region_from(
                    src,
                    region.tile_rect,
                    region.canvas_rect.x,
                    region.canvas_rect.y,
                );
            }
        }
        canvas
    }

    pub fn collect_heightmap(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.heights.is_none() {
            self.heights = Some(self.stitch(store, cache, &ChannelKind::Height));
        }
    }

    /// Derives normals and slopes from the stitched heightmap.
    pub fn collect_normalmap(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.normals.is_some() {
            return;
        }
        self.collect_heightmap(store, cache);
        let Some(heights) = self.heights.as_ref() else {
            return;
        };
        let mut slopes = self.pool.acquire(heights.grid.clone());
        let normals = derive_normals(heights, &mut slopes);
        self.slopes = Some(slopes);
        self.normals = Some(normals);
    }

    pub fn collect_splatmaps(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.splats.is_some() {
            return;
        }
        let count = self.layer_count(store, ChannelClass::Control, |t| t.splat_layer_count());
        let layers = (0..count)
            .map(|i| self.stitch(store, cache, &ChannelKind::Splat(i)))
            .collect();
        self.splats = Some(layers);
    }

    pub fn collect_details(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.details.is_some() {
            return;
        }
        let count = self.layer_count(store, ChannelClass::Detail, |t| t.detail_layer_count());
        let layers = (0..count)
            .map(|i| self.stitch(store, cache, &ChannelKind::Detail(i)))
            .collect();
        self.details = Some(layers);
    }

    pub fn collect_trees(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.trees.is_none() {
            self.trees = Some(self.gather_instances(store, cache, InstanceKind::Tree));
        }
    }

    pub fn collect_game_objects(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.game_objects.is_none() {
            self.game_objects = Some(self.gather_instances(store, cache, InstanceKind::GameObject));
        }
    }

    pub fn collect_baked_masks(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        if self.baked_masks.is_some() {
            return;
        }
        let mut names: Vec<String> = self
            .layout(ChannelClass::Height)
            .tiles()
            .filter_map(|id| store.tile(id))
            .flat_map(|t| t.baked_mask_names())
            .collect();
        names.sort();
        names.dedup();
        let masks = names
            .into_iter()
            .map(|name| {
                let canvas = self.stitch(store, cache, &ChannelKind::BakedMask(name.clone()));
                (name, canvas)
            })
            .collect();
        self.baked_masks = Some(masks);
    }

    /// Runs every collector in a fixed order.
    pub fn collect_all(&mut self, store: &dyn TileStore, cache: &mut DataCache) {
        self.collect_heightmap(store, cache);
        self.collect_normalmap(store, cache);
        self.collect_splatmaps(store, cache);
        self.collect_details(store, cache);
        self.collect_trees(store, cache);
        self.collect_game_objects(store, cache);
        self.collect_baked_masks(store, cache);
    }

    fn layer_count(
        &self,
        store: &dyn TileStore,
        class: ChannelClass,
        count: impl Fn(&dyn Tile) -> usize,
    ) -> usize {
        self.layout(class)
            .tiles()
            .filter_map(|id| store.tile(id))
            .map(count)
            .max()
            .unwrap_or(0)
    }

    fn gather_instances(
        &self,
        store: &dyn TileStore,
        cache: &mut DataCache,
        kind: InstanceKind,
    ) -> Vec<PlacedInstance> {
        let mut out = Vec::new();
        for &tile in &self.tiles {
            out.extend(
                cache
                    .instances(store, tile, kind)
                    .iter()
                    .filter(|i| self.square.contains(i.position.xz()))
                    .cloned(),
            );
        }
        out
    }

    pub fn heightmap(&self) -> Option<&Raster> {
        self.heights.as_deref()
    }

    /// Slope in degrees on the height canvas.
    pub fn slopes(&self) -> Option<&Raster> {
        self.slopes.as_deref()
    }

    pub fn normals(&self) -> Option<&[Vec3]> {
        self.normals.as_deref()
    }

    pub fn splat_layer_count(&self) -> usize {
        self.splats.as_ref().map_or(0, Vec::len)
    }

    pub fn splatmap(&self, layer: usize) -> Option<&Raster> {
        self.splats.as_ref()?.get(layer).map(|r| &**r)
    }

    pub fn splatmaps_mut(&mut self) -> &mut [PooledRaster] {
        self.splats.as_deref_mut().unwrap_or_default()
    }

    /// Grows the splat canvases to at least `count` zeroed layers.
    pub fn ensure_splat_layers(&mut self, count: usize) {
        let grid = self.layout(ChannelClass::Control).grid.clone();
        let pool = Arc::clone(&self.pool);
        let layers = self.splats.get_or_insert_with(Vec::new);
        while layers.len() < count {
            layers.push(pool.acquire(grid.clone()));
        }
    }

    pub fn detail_layer_count(&self) -> usize {
        self.details.as_ref().map_or(0, Vec::len)
    }

    pub fn detail(&self, layer: usize) -> Option<&Raster> {
        self.details.as_ref()?.get(layer).map(|r| &**r)
    }

    pub fn detail_mut(&mut self, layer: usize) -> Option<&mut Raster> {
        self.details.as_mut()?.get_mut(layer).map(|r| &mut **r)
    }

    /// Grows the detail canvases to at least `count` zeroed layers.
    pub fn ensure_detail_layers(&mut self, count: usize) {
        let grid = self.layout(ChannelClass::Detail).grid.clone();
        let pool = Arc::clone(&self.pool);
        let layers = self.details.get_or_insert_with(Vec::new);
        while layers.len() < count {
            layers.push(pool.acquire(grid.clone()));
        }
    }

    pub fn trees(&self) -> &[PlacedInstance] {
        self.trees.as_deref().unwrap_or_default()
    }

    pub fn game_objects(&self) -> &[PlacedInstance] {
        self.game_objects.as_deref().unwrap_or_default()
    }

    pub fn baked_mask(&self, name: &str) -> Option<&Raster> {
        self.baked_masks.as_ref()?.get(name).map(|r| &**r)
    }

    pub fn baked_mask_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.baked_masks
            .iter()
            .flat_map(|m| m.keys().map(String::as_str))
    }

    /// Whether simulate found `tile` affected by the last write of `resource_type`.
    pub fn was_affected(&self, resource_type: ResourceType, tile: TileId) -> Option<bool> {
        self.affected.get(&(resource_type, tile)).copied()
    }

    pub fn affected_record(&self) -> &HashMap<(ResourceType, TileId), bool> {
        &self.affected
    }

    /// Mask evaluation inputs over this workspace's collected channels.
    pub fn mask_context<'a>(
        &'a self,
        store: &'a dyn TileStore,
        cache: &'a mut DataCache,
        textures: &'a TextureRegistry,
        scope: InfluenceScope,
    ) -> MaskContext<'a> {
        let mut ctx = MaskContext::new(self.center, textures)
            .with_pool(Arc::clone(&self.pool))
            .with_scope(scope)
            .with_collisions(CollisionInputs {
                store,
                cache,
                tiles: &self.tiles,
            });
        if let (Some(heights), Some(slopes)) = (self.heights.as_deref(), self.slopes.as_deref()) {
            ctx = ctx.with_heights(heights, slopes);
        } else if let Some(heights) = self.heights.as_deref() {
            ctx.heights = Some(heights);
        }
        if let Some(splats) = self.splats.as_ref() {
            ctx = ctx.with_splats(splats.iter().map(|r| &**r).collect());
        }
        ctx
    }

    /// Writes every splat canvas layer into the affected tiles.
    pub fn set_splatmap(
        &mut self,
        store: &mut dyn TileStore,
        cache: &mut DataCache,
        registry: Option<&dyn PrototypeRegistry>,
        affected: &AffectedSet,
    ) -> Result<WriteReport> {
        let layers = self.splats.as_deref().unwrap_or_default();
        let layout = &self.layouts[class_slot(ChannelClass::Control)];
        let mut report = WriteReport::default();
        for region in &layout.regions {
            let hit = affected.is_affected(region.tile);
            self.affected.insert((ResourceType::Texture, region.tile), hit);
            if !hit || layers.is_empty() {
                continue;
            }
            let values: Vec<Vec<f32>> = layers
                .iter()
                .map(|l| region_values(l, region.canvas_rect))
                .collect();
            for layer in 0..values.len() {
                cache.mark_raster_dirty(region.tile, &ChannelKind::Splat(layer));
            }
            // Highest layer first: registering a missing layer also creates the ones below it.
            let registered = write_with_recovery(store, registry, region.tile, |tile| {
                for (layer, v) in values.iter().enumerate().rev() {
                    tile.write_channel(&ChannelKind::Splat(layer), region.tile_rect, v)?;
                }
                Ok(())
            })?;
            report.tiles_written += 1;
            report.registrations += usize::from(registered);
        }
        Ok(report)
    }

    /// Writes detail canvas `layer` into the affected tiles.
    pub fn set_terrain_details(
        &mut self,
        store: &mut dyn TileStore,
        cache: &mut DataCache,
        registry: Option<&dyn PrototypeRegistry>,
        layer: usize,
        affected: &AffectedSet,
    ) -> Result<WriteReport> {
        let Some(canvas) = self.details.as_ref().and_then(|d| d.get(layer)) else {
            return Err(Error::InvalidConfig(format!(
                "detail layer {layer} has not been collected"
            )));
        };
        let layout = &self.layouts[class_slot(ChannelClass::Detail)];
        let channel = ChannelKind::Detail(layer);
        let mut report = WriteReport::default();
        for region in &layout.regions {
            let hit = affected.is_affected(region.tile);
            self.affected.insert((ResourceType::Detail, region.tile), hit);
            if !hit {
                continue;
            }
            let values = region_values(canvas, region.canvas_rect);
            cache.mark_raster_dirty(region.tile, &channel);
            let registered = write_with_recovery(store, registry, region.tile, |tile| {
                tile.write_channel(&channel, region.tile_rect, &values)
            })?;
            report.tiles_written += 1;
            report.registrations += usize::from(registered);
        }
        Ok(report)
    }

    /// Writes `canvas`, laid out on the height canvas, into the affected tiles' baked mask `name`.
    pub fn set_baked_mask(
        &mut self,
        store: &mut dyn TileStore,
        cache: &mut DataCache,
        name: &str,
        canvas: &Raster,
        affected: &AffectedSet,
    ) -> Result<WriteReport> {
        let layout = &self.layouts[class_slot(ChannelClass::Height)];
        if canvas.grid != layout.grid {
            return Err(Error::InvalidConfig(format!(
                "baked mask '{name}' is not laid out on the height canvas"
            )));
        }
        let channel = ChannelKind::BakedMask(name.to_owned());
        let mut report = WriteReport::default();
        for region in &layout.regions {
            let hit = affected.is_affected(region.tile);
            self.affected
                .insert((ResourceType::WorldBiomeMask, region.tile), hit);
            if !hit {
                continue;
            }
            let values = region_values(canvas, region.canvas_rect);
            cache.mark_raster_dirty(region.tile, &channel);
            let tile = store
                .tile_mut(region.tile)
                .ok_or(Error::UnknownTile(region.tile))?;
            tile.write_channel(&channel, region.tile_rect, &values)?;
            report.tiles_written += 1;
        }
        if report.tiles_written > 0 {
            let pooled = self.pool.acquire_copy(canvas);
            self.baked_masks
                .get_or_insert_with(BTreeMap::new)
                .insert(name.to_owned(), pooled);
        }
        Ok(report)
    }

    /// Appends placements to the instance lists of the affected tiles containing them.
    ///
    /// Placements outside every affected tile are dropped.
    pub fn set_instances(
        &mut self,
        store: &mut dyn TileStore,
        cache: &mut DataCache,
        registry: Option<&dyn PrototypeRegistry>,
        resource_type: ResourceType,
        placements: Vec<PlacedInstance>,
        affected: &AffectedSet,
    ) -> Result<WriteReport> {
        let Some(kind) = resource_type.instance_kind() else {
            return Err(Error::InvalidConfig(format!(
                "{resource_type} rules do not place instances"
            )));
        };

        let mut targets = Vec::with_capacity(self.tiles.len());
        for &tile in &self.tiles {
            let hit = affected.is_affected(tile);
            self.affected.insert((resource_type, tile), hit);
            if hit {
                if let Some(t) = store.tile(tile) {
                    targets.push((tile, t.bounds()));
                }
            }
        }

        let mut batches: BTreeMap<TileId, Vec<PlacedInstance>> = BTreeMap::new();
        for placement in placements {
            let p = placement.position.xz();
            if let Some((tile, _)) = targets.iter().find(|(_, b)| b.contains(p)) {
                batches.entry(*tile).or_default().push(placement);
            }
        }

        let mut report = WriteReport::default();
        for (tile, batch) in batches {
            cache.mark_instances_dirty(tile, kind);
            let registered = write_with_recovery(store, registry, tile, |t| {
                t.add_instances(kind, batch.clone())
            })?;
            match kind {
                InstanceKind::Tree => self.trees.get_or_insert_with(Vec::new).extend(batch),
                InstanceKind::GameObject => {
                    self.game_objects.get_or_insert_with(Vec::new).extend(batch)
                }
                _ => {}
            }
            report.tiles_written += 1;
            report.registrations += usize::from(registered);
        }
        if report.tiles_written > 0 {
            cache.invalidate_collision_masks();
        }
        Ok(report)
    }

    pub fn set_terrain_trees(
        &mut self,
        store: &mut dyn TileStore,
        cache: &mut DataCache,
        registry: Option<&dyn PrototypeRegistry>,
        placements: Vec<PlacedInstance>,
        affected: &AffectedSet,
    ) -> Result<WriteReport> {
        self.set_instances(store, cache, registry, ResourceType::Tree, placements, affected)
    }

    pub fn set_terrain_game_objects(
        &mut self,
        store: &mut dyn TileStore,
        cache: &mut DataCache,
        registry: Option<&dyn PrototypeRegistry>,
        placements: Vec<PlacedInstance>,
        affected: &AffectedSet,
    ) -> Result<WriteReport> {
        self.set_instances(
            store,
            cache,
            registry,
            ResourceType::GameObject,
            placements,
            affected,
        )
    }

    /// Releases every pooled buffer.
    pub fn close(self) {
        debug!(
            "Closing workspace at {} ({} tile(s)).",
            self.center,
            self.tiles.len()
        );
    }
}

fn region_values(canvas: &Raster, rect: PixelRect) -> Vec<f32> {
    let mut values = Vec::with_capacity(rect.area());
    for iy in rect.y..rect.y_end() {
        let start = canvas.grid.index(rect.x, iy);
        values.extend_from_slice(&canvas.data[start..start + rect.width]);
    }
    values
}

/// Runs `write` on `tile`. A missing prototype is registered from `registry` and the write is
/// retried once. Returns whether a prototype was registered.
fn write_with_recovery<F>(
    store: &mut dyn TileStore,
    registry: Option<&dyn PrototypeRegistry>,
    tile: TileId,
    mut write: F,
) -> Result<bool>
where
    F: FnMut(&mut dyn Tile) -> Result<()>,
{
    let target = store.tile_mut(tile).ok_or(Error::UnknownTile(tile))?;
    match write(&mut *target) {
        Ok(()) => Ok(false),
        Err(Error::MissingResource {
            resource_type,
            index,
            ..
        }) if registry.is_some() => {
            let descriptor = registry
                .and_then(|r| r.lookup(resource_type, index))
                .ok_or(Error::UnknownPrototype {
                    resource_type,
                    index,
                })?;
            debug!(
                "Registering {} prototype '{}' on tile {}.",
                resource_type, descriptor.name, tile
            );
            target.register_prototype(&descriptor)?;
            write(&mut *target)?;
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// Central-difference normals of `heights`; writes slope degrees into `slopes`.
fn derive_normals(heights: &Raster, slopes: &mut Raster) -> Vec<Vec3> {
    let (w, h) = heights.size();
    let cs = heights.grid.cell_size;
    let mut normals = Vec::with_capacity(w * h);
    for iy in 0..h {
        let (y0, y1) = (iy.saturating_sub(1), (iy + 1).min(h - 1));
        for ix in 0..w {
            let (x0, x1) = (ix.saturating_sub(1), (ix + 1).min(w - 1));
            let dx = if x1 > x0 {
                (heights.at(x1, iy) - heights.at(x0, iy)) / ((x1 - x0) as f32 * cs)
            } else {
                0.0
            };
            let dz = if y1 > y0 {
                (heights.at(ix, y1) - heights.at(ix, y0)) / ((y1 - y0) as f32 * cs)
            } else {
                0.0
            };
            let n = Vec3::new(-dx, 1.0, -dz).normalize();
            slopes.set(ix, iy, n.y.clamp(-1.0, 1.0).acos().to_degrees());
            normals.push(n);
        }
    }
    normals
}
