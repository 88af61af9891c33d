//! Per-tile data caches shared across the cells of an area pass.
//!
//! [`DataCache`] memoizes tile channel and instance reads, keeps a tag-indexed
//! [`SpatialIndex`] of placed instances and a [`CollisionCache`] of baked occupancy rasters.
//! Write-back marks entries dirty: a dirty entry is re-read on its next access and purged by
//! [`DataCache::flush`].
pub mod collision;
pub mod spatial;

use std::collections::{HashMap, HashSet};

use tracing::debug;

pub use collision::{bake_occupancy, CollisionCache};
pub use spatial::{SpatialEntry, SpatialIndex};

use crate::raster::{CanvasGrid, Raster};
use crate::resource::{InstanceKind, PlacedInstance};
use crate::tiles::{ChannelKind, TileId, TileStore};

/// Hit and miss counters of a [`DataCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Raster(TileId, ChannelKind),
    Instances(TileId, InstanceKind),
}

/// Cache of tile reads, spatial index and collision masks.
#[derive(Debug, Default)]
pub struct DataCache {
    rasters: HashMap<(TileId, ChannelKind), Raster>,
    instances: HashMap<(TileId, InstanceKind), Vec<PlacedInstance>>,
    dirty: HashSet<CacheKey>,
    spatial: SpatialIndex,
    collision: CollisionCache,
    stats: CacheStats,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel of a tile, read through the cache. `None` if the tile or channel is absent.
    pub fn raster(
        &mut self,
        store: &dyn TileStore,
        tile: TileId,
        channel: &ChannelKind,
    ) -> Option<&Raster> {
        let key = (tile, channel.clone());
        let dirty = self.dirty.remove(&CacheKey::Raster(tile, channel.clone()));
        if !dirty && self.rasters.contains_key(&key) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            match store.tile(tile).and_then(|t| t.read_channel(channel)) {
                Some(raster) => {
                    self.rasters.insert(key.clone(), raster);
                }
                None => {
                    self.rasters.remove(&key);
                }
            }
        }
        self.rasters.get(&key)
    }

    /// Instance list of a tile, read through the cache.
    pub fn instances(
        &mut self,
        store: &dyn TileStore,
        tile: TileId,
        kind: InstanceKind,
    ) -> &[PlacedInstance] {
        let key = (tile, kind);
        let dirty = self.dirty.remove(&CacheKey::Instances(tile, kind));
        if !dirty && self.instances.contains_key(&key) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let list = store
                .tile(tile)
                .map(|t| t.instances(kind).to_vec())
                .unwrap_or_default();
            self.instances.insert(key, list);
        }
        self.instances
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn mark_raster_dirty(&mut self, tile: TileId, channel: &ChannelKind) {
        self.dirty.insert(CacheKey::Raster(tile, channel.clone()));
    }

    /// Marks an instance list dirty and drops the tile from the spatial index.
    pub fn mark_instances_dirty(&mut self, tile: TileId, kind: InstanceKind) {
        self.dirty.insert(CacheKey::Instances(tile, kind));
        self.spatial.remove_tile(tile);
    }

    pub fn is_dirty(&self, tile: TileId, channel: &ChannelKind) -> bool {
        self.dirty
            .contains(&CacheKey::Raster(tile, channel.clone()))
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Purges every dirty entry.
    pub fn flush(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        debug!("Flushing {} dirty cache entries.", self.dirty.len());
        for key in self.dirty.drain() {
            match key {
                CacheKey::Raster(tile, channel) => {
                    self.rasters.remove(&(tile, channel));
                }
                CacheKey::Instances(tile, kind) => {
                    self.instances.remove(&(tile, kind));
                }
            }
        }
    }

    /// Drops everything, including the spatial index and collision masks.
    pub fn clear(&mut self) {
        self.rasters.clear();
        self.instances.clear();
        self.dirty.clear();
        self.spatial.clear();
        self.collision.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Loads the instances of `tiles` into the spatial index and returns it.
    pub fn spatial_index(&mut self, store: &dyn TileStore, tiles: &[TileId]) -> &SpatialIndex {
        self.ensure_indexed(store, tiles);
        &self.spatial
    }

    pub fn spatial_index_mut(
        &mut self,
        store: &dyn TileStore,
        tiles: &[TileId],
    ) -> &mut SpatialIndex {
        self.ensure_indexed(store, tiles);
        &mut self.spatial
    }

    fn ensure_indexed(&mut self, store: &dyn TileStore, tiles: &[TileId]) {
        for &tile in tiles {
            if self.spatial.is_indexed(tile) {
                continue;
            }
            let Some(t) = store.tile(tile) else {
                continue;
            };
            let all = InstanceKind::ALL
                .iter()
                .flat_map(|kind| t.instances(*kind).iter());
            self.spatial.index_tile(tile, all);
        }
    }

    /// Occupancy raster for `tags` on `grid`, baked on first request.
    pub fn collision_mask(
        &mut self,
        store: &dyn TileStore,
        grid: &CanvasGrid,
        tiles: &[TileId],
        tags: &[String],
        radius: f32,
    ) -> &Raster {
        self.ensure_indexed(store, tiles);
        let (raster, hit) =
            self.collision
                .get_or_bake(store, &self.spatial, grid, tiles, tags, radius);
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        raster
    }

    /// Drops all baked collision masks.
    pub fn invalidate_collision_masks(&mut self) {
        self.collision.clear();
    }

    pub fn collision_mask_count(&self) -> usize {
        self.collision.len()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3};

    use super::*;
    use crate::raster::{PixelRect, WorldRect};
    use crate::resource::{PrototypeDescriptor, ResourceType};
    use crate::tiles::{MemoryTile, MemoryTileStore};

    fn store() -> MemoryTileStore {
        let mut store = MemoryTileStore::new();
        let bounds = WorldRect::from_origin_size(Vec2::ZERO, Vec2::splat(4.0));
        store.insert(
            MemoryTile::new(TileId(0), "t", bounds, 4)
                .with_prototype(&PrototypeDescriptor::new(ResourceType::Detail, 0, "grass", 0.0))
                .with_prototype(&PrototypeDescriptor::new(ResourceType::Tree, 0, "oak", 1.0)),
        );
        store
    }

    #[test]
    fn reads_hit_until_marked_dirty() {
        let mut store = store();
        let mut cache = DataCache::new();
        let ch = ChannelKind::Detail(0);
        assert!(cache.raster(&store, TileId(0), &ch).is_some());
        assert!(cache.raster(&store, TileId(0), &ch).is_some());
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });

        let tile = store.tile_mut(TileId(0)).expect("tile");
        tile.write_channel(&ch, PixelRect::new(0, 0, 1, 1), &[0.5])
            .expect("write");
        cache.mark_raster_dirty(TileId(0), &ch);
        assert!(cache.is_dirty(TileId(0), &ch));
        let fresh = cache.raster(&store, TileId(0), &ch).expect("layer");
        assert_eq!(fresh.at(0, 0), 0.5);
        assert_eq!(cache.stats().misses, 2);
        assert!(!cache.is_dirty(TileId(0), &ch));
    }

    #[test]
    fn missing_channel_reads_none() {
        let store = store();
        let mut cache = DataCache::new();
        assert!(cache
            .raster(&store, TileId(0), &ChannelKind::Detail(4))
            .is_none());
        assert!(cache
            .raster(&store, TileId(9), &ChannelKind::Height)
            .is_none());
    }

    #[test]
    fn flush_purges_dirty_entries() {
        let store = store();
        let mut cache = DataCache::new();
        let _ = cache.raster(&store, TileId(0), &ChannelKind::Height);
        let _ = cache.instances(&store, TileId(0), InstanceKind::Tree);
        cache.mark_raster_dirty(TileId(0), &ChannelKind::Height);
        cache.mark_instances_dirty(TileId(0), InstanceKind::Tree);
        assert_eq!(cache.dirty_count(), 2);
        cache.flush();
        assert_eq!(cache.dirty_count(), 0);
        let _ = cache.raster(&store, TileId(0), &ChannelKind::Height);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn spatial_index_reindexes_after_instance_write() {
        let mut store = store();
        let mut cache = DataCache::new();
        assert!(cache.spatial_index(&store, &[TileId(0)]).is_empty());

        let oak = PrototypeDescriptor::new(ResourceType::Tree, 0, "oak", 1.0);
        let tile = store.tile_mut(TileId(0)).expect("tile");
        tile.add_instances(
            InstanceKind::Tree,
            vec![PlacedInstance {
                identity: oak.identity(),
                resource_type: ResourceType::Tree,
                index: 0,
                tag: "oak".into(),
                position: Vec3::new(2.0, 0.0, 2.0),
                rotation_degrees: 0.0,
                scale: 1.0,
                radius: 1.0,
            }],
        )
        .expect("add");
        // Still indexed from before the write.
        assert!(cache.spatial_index(&store, &[TileId(0)]).is_empty());
        cache.mark_instances_dirty(TileId(0), InstanceKind::Tree);
        assert_eq!(cache.spatial_index(&store, &[TileId(0)]).len(), 1);
    }

    #[test]
    fn collision_masks_cache_until_invalidated() {
        let store = store();
        let mut cache = DataCache::new();
        let grid = CanvasGrid::new(Vec2::ZERO, 1.0, 4, 4);
        let tags = vec!["oak".to_string()];
        let _ = cache.collision_mask(&store, &grid, &[TileId(0)], &tags, 0.0);
        let _ = cache.collision_mask(&store, &grid, &[TileId(0)], &tags, 0.0);
        assert_eq!(cache.collision_mask_count(), 1);
        cache.invalidate_collision_masks();
        assert_eq!(cache.collision_mask_count(), 0);
    }
}
