//! In-memory tiles and tile store.
use std::collections::{HashMap, HashSet};

use glam::Vec2;

use super::{ChannelKind, Tile, TileId, TileScope, TileStore};
use crate::error::{Error, Result};
use crate::raster::{CanvasGrid, ChannelClass, PixelRect, Raster, WorldRect};
use crate::resource::{
    InstanceKind, PlacedInstance, PrototypeDescriptor, ResourceIdentity, ResourceType,
};

/// Tile held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryTile {
    id: TileId,
    name: String,
    scope: TileScope,
    bounds: WorldRect,
    resolutions: [u32; 3],
    height: Raster,
    splats: Vec<Raster>,
    details: Vec<Raster>,
    baked: HashMap<String, Raster>,
    instances: HashMap<InstanceKind, Vec<PlacedInstance>>,
    prototypes: HashSet<(ResourceType, usize)>,
    writes: usize,
}

fn class_slot(class: ChannelClass) -> usize {
    match class {
        ChannelClass::Height => 0,
        ChannelClass::Control => 1,
        ChannelClass::Detail => 2,
    }
}

impl MemoryTile {
    /// A flat tile with every channel class at `resolution`.
    pub fn new(id: TileId, name: impl Into<String>, bounds: WorldRect, resolution: u32) -> Self {
        let resolution = resolution.max(1);
        let height = Raster::new(CanvasGrid::covering(bounds, resolution));
        Self {
            id,
            name: name.into(),
            scope: TileScope::World,
            bounds,
            resolutions: [resolution; 3],
            height,
            splats: Vec::new(),
            details: Vec::new(),
            baked: HashMap::new(),
            instances: HashMap::new(),
            prototypes: HashSet::new(),
            writes: 0,
        }
    }

    pub fn with_scope(mut self, scope: TileScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets per-class resolutions. Existing channel contents are reset.
    pub fn with_resolutions(mut self, height: u32, control: u32, detail: u32) -> Self {
        self.resolutions = [height.max(1), control.max(1), detail.max(1)];
        self.height = Raster::new(self.grid(ChannelClass::Height));
        let control_grid = self.grid(ChannelClass::Control);
        for layer in &mut self.splats {
            *layer = Raster::new(control_grid.clone());
        }
        let detail_grid = self.grid(ChannelClass::Detail);
        for layer in &mut self.details {
            *layer = Raster::new(detail_grid.clone());
        }
        self
    }

    /// Samples `f` at every height pixel center.
    pub fn with_height_fn(mut self, f: impl Fn(Vec2) -> f32) -> Self {
        let grid = self.height.grid.clone();
        for iy in 0..grid.height {
            for ix in 0..grid.width {
                self.height.set(ix, iy, f(grid.index_to_world(ix, iy)));
            }
        }
        self
    }

    pub fn with_baked_mask(mut self, name: impl Into<String>, f: impl Fn(Vec2) -> f32) -> Self {
        let grid = self.grid(ChannelClass::Height);
        let mut mask = Raster::new(grid.clone());
        for iy in 0..grid.height {
            for ix in 0..grid.width {
                mask.set(ix, iy, f(grid.index_to_world(ix, iy)));
            }
        }
        self.baked.insert(name.into(), mask);
        self
    }

    pub fn with_prototype(mut self, descriptor: &PrototypeDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn with_instances(mut self, kind: InstanceKind, instances: Vec<PlacedInstance>) -> Self {
        self.instances.entry(kind).or_default().extend(instances);
        self
    }

    /// Registers a prototype locally. Splat and detail registrations grow the layer lists.
    pub fn register(&mut self, descriptor: &PrototypeDescriptor) {
        let index = descriptor.index;
        match descriptor.resource_type {
            ResourceType::Texture => {
                let grid = self.grid(ChannelClass::Control);
                while self.splats.len() <= index {
                    // The first layer carries the full weight.
                    let fill = if self.splats.is_empty() { 1.0 } else { 0.0 };
                    self.splats.push(Raster::filled(grid.clone(), fill));
                }
            }
            ResourceType::Detail => {
                let grid = self.grid(ChannelClass::Detail);
                while self.details.len() <= index {
                    self.details.push(Raster::new(grid.clone()));
                }
            }
            ResourceType::WorldBiomeMask => {}
            other => {
                self.prototypes.insert((other, index));
            }
        }
    }

    /// Number of successful channel and instance writes.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn layer_mut(&mut self, channel: &ChannelKind) -> Result<&mut Raster> {
        let tile = self.id;
        match channel {
            ChannelKind::Height => Ok(&mut self.height),
            ChannelKind::Splat(i) => self.splats.get_mut(*i).ok_or(Error::MissingResource {
                tile,
                resource_type: ResourceType::Texture,
                index: *i,
            }),
            ChannelKind::Detail(i) => self.details.get_mut(*i).ok_or(Error::MissingResource {
                tile,
                resource_type: ResourceType::Detail,
                index: *i,
            }),
            ChannelKind::BakedMask(name) => {
                let grid = CanvasGrid::covering(
                    self.bounds,
                    self.resolutions[class_slot(ChannelClass::Height)],
                );
                Ok(self
                    .baked
                    .entry(name.clone())
                    .or_insert_with(|| Raster::new(grid)))
            }
        }
    }
}

impl Tile for MemoryTile {
    fn id(&self) -> TileId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> TileScope {
        self.scope
    }

    fn bounds(&self) -> WorldRect {
        self.bounds
    }

    fn resolution(&self, class: ChannelClass) -> u32 {
        self.resolutions[class_slot(class)]
    }

    fn splat_layer_count(&self) -> usize {
        self.splats.len()
    }

    fn detail_layer_count(&self) -> usize {
        self.details.len()
    }

    fn baked_mask_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.baked.keys().cloned().collect();
        names.sort();
        names
    }

    fn read_channel(&self, channel: &ChannelKind) -> Option<Raster> {
        match channel {
            ChannelKind::Height => Some(self.height.clone()),
            ChannelKind::Splat(i) => self.splats.get(*i).cloned(),
            ChannelKind::Detail(i) => self.details.get(*i).cloned(),
            ChannelKind::BakedMask(name) => self.baked.get(name).cloned(),
        }
    }

    fn write_channel(
        &mut self,
        channel: &ChannelKind,
        region: PixelRect,
        values: &[f32],
    ) -> Result<()> {
        if values.len() != region.area() {
            return Err(Error::InvalidConfig(format!(
                "write of {} values into a {}x{} region",
                values.len(),
                region.width,
                region.height
            )));
        }
        let layer = self.layer_mut(channel)?;
        let (w, h) = layer.size();
        if region.x_end() > w || region.y_end() > h {
            return Err(Error::InvalidConfig(format!(
                "region {region:?} exceeds a {w}x{h} channel"
            )));
        }
        for row in 0..region.height {
            let d = layer.grid.index(region.x, region.y + row);
            let s = row * region.width;
            layer.data[d..d + region.width].copy_from_slice(&values[s..s + region.width]);
        }
        self.writes += 1;
        Ok(())
    }

    fn instances(&self, kind: InstanceKind) -> &[PlacedInstance] {
        self.instances.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    fn add_instances(&mut self, kind: InstanceKind, instances: Vec<PlacedInstance>) -> Result<()> {
        if let Some(missing) = instances
            .iter()
            .find(|i| !self.prototypes.contains(&(i.resource_type, i.index)))
        {
            return Err(Error::MissingResource {
                tile: self.id,
                resource_type: missing.resource_type,
                index: missing.index,
            });
        }
        self.instances.entry(kind).or_default().extend(instances);
        self.writes += 1;
        Ok(())
    }

    fn remove_instances(&mut self, kind: InstanceKind, identity: ResourceIdentity) -> usize {
        let Some(list) = self.instances.get_mut(&kind) else {
            return 0;
        };
        let before = list.len();
        list.retain(|i| i.identity != identity);
        let removed = before - list.len();
        if removed > 0 {
            self.writes += 1;
        }
        removed
    }

    fn has_prototype(&self, resource_type: ResourceType, index: usize) -> bool {
        match resource_type {
            ResourceType::Texture => index < self.splats.len(),
            ResourceType::Detail => index < self.details.len(),
            ResourceType::WorldBiomeMask => true,
            _ => self.prototypes.contains(&(resource_type, index)),
        }
    }

    fn register_prototype(&mut self, descriptor: &PrototypeDescriptor) -> Result<()> {
        self.register(descriptor);
        Ok(())
    }
}

/// A [`TileStore`] over a list of [`MemoryTile`]s.
#[derive(Clone, Debug, Default)]
pub struct MemoryTileStore {
    tiles: Vec<MemoryTile>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self { tiles: Vec::new() }
    }

    /// A `columns × rows` grid of square tiles of side `tile_size` starting at `origin`,
    /// with heights sampled from `height`. Tiles are numbered in raster order.
    pub fn grid(
        origin: Vec2,
        tile_size: f32,
        columns: u32,
        rows: u32,
        resolution: u32,
        height: impl Fn(Vec2) -> f32,
    ) -> Self {
        let mut store = Self::new();
        for z in 0..rows {
            for x in 0..columns {
                let min = origin + Vec2::new(x as f32, z as f32) * tile_size;
                let bounds = WorldRect::from_origin_size(min, Vec2::splat(tile_size));
                let id = TileId(z * columns + x);
                let tile = MemoryTile::new(id, format!("tile_{x}_{z}"), bounds, resolution)
                    .with_height_fn(&height);
                store.insert(tile);
            }
        }
        store
    }

    /// Adds a tile, replacing any tile with the same id.
    pub fn insert(&mut self, tile: MemoryTile) -> TileId {
        let id = tile.id;
        self.tiles.retain(|t| t.id != id);
        self.tiles.push(tile);
        self.tiles.sort_by_key(|t| t.id);
        id
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn ids(&self) -> Vec<TileId> {
        self.tiles.iter().map(|t| t.id).collect()
    }

    /// Concrete access for inspection.
    pub fn memory_tile(&self, id: TileId) -> Option<&MemoryTile> {
        self.tiles.iter().find(|t| t.id == id)
    }

    /// Applies `f` to every tile.
    pub fn for_each_tile_mut(&mut self, mut f: impl FnMut(&mut MemoryTile)) {
        self.tiles.iter_mut().for_each(&mut f);
    }

    /// Registers `descriptor` on every tile.
    pub fn register_everywhere(&mut self, descriptor: &PrototypeDescriptor) -> Result<()> {
        for tile in &mut self.tiles {
            tile.register_prototype(descriptor)?;
        }
        Ok(())
    }

    pub fn total_writes(&self) -> usize {
        self.tiles.iter().map(|t| t.writes).sum()
    }
}

impl TileStore for MemoryTileStore {
    fn tiles_overlapping(&self, rect: WorldRect) -> Vec<TileId> {
        self.tiles
            .iter()
            .filter(|t| t.bounds.intersects(&rect))
            .map(|t| t.id)
            .collect()
    }

    fn tile(&self, id: TileId) -> Option<&dyn Tile> {
        self.tiles
            .iter()
            .find(|t| t.id == id)
            .map(|t| t as &dyn Tile)
    }

    fn tile_mut(&mut self, id: TileId) -> Option<&mut dyn Tile> {
        self.tiles
            .iter_mut()
            .find(|t| t.id == id)
            .map(|t| t as &mut dyn Tile)
    }
}
