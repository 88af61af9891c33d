//! Tile storage interface consumed by the engine.
//!
//! The engine never owns tiles. A host exposes them through [`TileStore`], and each [`Tile`]
//! hands out its raster channels and instance lists in its own pixel space. [`memory`] holds an
//! in-memory implementation used by tests, benches and demos.
pub mod memory;

use std::fmt;

use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raster::{CanvasGrid, ChannelClass, PixelRect, Raster, WorldRect};
use crate::resource::{
    InstanceKind, PlacedInstance, PrototypeDescriptor, ResourceIdentity, ResourceType,
};

pub use memory::{MemoryTile, MemoryTileStore};

/// Identifier of a tile inside a [`TileStore`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u32);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which map a tile belongs to. Tiles only stitch with tiles of the same scope.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TileScope {
    #[default]
    World,
    Local,
}

/// A raster channel of a tile.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Height,
    /// Splat weight of a texture layer.
    Splat(usize),
    /// Density of a detail layer.
    Detail(usize),
    /// Named mask baked by biome rules or by the host.
    BakedMask(String),
}

impl ChannelKind {
    pub fn class(&self) -> ChannelClass {
        match self {
            ChannelKind::Height | ChannelKind::BakedMask(_) => ChannelClass::Height,
            ChannelKind::Splat(_) => ChannelClass::Control,
            ChannelKind::Detail(_) => ChannelClass::Detail,
        }
    }
}

/// One terrain tile.
///
/// Channel rasters cover [`Tile::bounds`] with `resolution(class)²` cell-centered pixels.
/// Writes that target a splat layer, detail layer or instance prototype the tile has not
/// registered fail with [`crate::error::Error::MissingResource`].
pub trait Tile: Send + Sync {
    fn id(&self) -> TileId;
    fn name(&self) -> &str;
    fn scope(&self) -> TileScope;
    fn bounds(&self) -> WorldRect;
    fn resolution(&self, class: ChannelClass) -> u32;

    /// Pixel lattice of a channel class in world space.
    fn grid(&self, class: ChannelClass) -> CanvasGrid {
        CanvasGrid::covering(self.bounds(), self.resolution(class))
    }

    fn splat_layer_count(&self) -> usize;
    fn detail_layer_count(&self) -> usize;
    fn baked_mask_names(&self) -> Vec<String>;

    /// A copy of the channel, or `None` if the tile does not carry it.
    fn read_channel(&self, channel: &ChannelKind) -> Option<Raster>;

    /// Overwrites `region` of the channel with row-major `values`.
    fn write_channel(&mut self, channel: &ChannelKind, region: PixelRect, values: &[f32])
        -> Result<()>;

    /// Sets every pixel of the channel to `value`.
    fn fill_channel(&mut self, channel: &ChannelKind, value: f32) -> Result<()> {
        let grid = self.grid(channel.class());
        let values = vec![value; grid.len()];
        self.write_channel(channel, grid.full_rect(), &values)
    }

    fn instances(&self, kind: InstanceKind) -> &[PlacedInstance];

    /// Appends instances to the list of `kind`.
    fn add_instances(&mut self, kind: InstanceKind, instances: Vec<PlacedInstance>) -> Result<()>;

    /// Removes every instance of `kind` carrying `identity`. Returns how many were removed.
    fn remove_instances(&mut self, kind: InstanceKind, identity: ResourceIdentity) -> usize;

    fn has_prototype(&self, resource_type: ResourceType, index: usize) -> bool;
    fn register_prototype(&mut self, descriptor: &PrototypeDescriptor) -> Result<()>;
}

/// Lookup of tiles by id and by world region.
pub trait TileStore {
    /// Tiles whose bounds share a region of positive area with `rect`, ordered by id.
    fn tiles_overlapping(&self, rect: WorldRect) -> Vec<TileId>;
    fn tile(&self, id: TileId) -> Option<&dyn Tile>;
    fn tile_mut(&mut self, id: TileId) -> Option<&mut dyn Tile>;

    /// The tile whose bounds contain `p`, if any.
    fn tile_at(&self, p: Vec2) -> Option<TileId> {
        let probe = WorldRect::from_center_half_extent(p, Vec2::splat(1e-3));
        self.tiles_overlapping(probe)
            .into_iter()
            .find(|id| self.tile(*id).is_some_and(|t| t.bounds().contains(p)))
    }
}

/// Host service that streams tiles in and out around a window.
pub trait TileLoader {
    fn set_loading_window(&mut self, window: WorldRect);
}
