//! Tag-indexed spatial hash over placed instances.
use std::collections::{HashMap, HashSet};

use glam::Vec2;

use crate::resource::{PlacedInstance, ResourceIdentity};
use crate::tiles::TileId;

/// Default bucket edge length in world units.
pub const DEFAULT_BUCKET_SIZE: f32 = 16.0;

/// An instance footprint in the index.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialEntry {
    pub tile: TileId,
    pub identity: ResourceIdentity,
    pub position: Vec2,
    pub radius: f32,
}

impl SpatialEntry {
    pub fn from_instance(tile: TileId, instance: &PlacedInstance) -> Self {
        Self {
            tile,
            identity: instance.identity,
            position: Vec2::new(instance.position.x, instance.position.z),
            radius: instance.radius,
        }
    }
}

/// Uniform-grid hash of instance footprints, bucketed per collision tag.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    bucket_size: f32,
    buckets: HashMap<String, HashMap<(i32, i32), Vec<SpatialEntry>>>,
    max_radius: f32,
    indexed: HashSet<TileId>,
}

impl SpatialIndex {
    pub fn new(bucket_size: f32) -> Self {
        Self {
            bucket_size: bucket_size.max(f32::EPSILON),
            buckets: HashMap::new(),
            max_radius: 0.0,
            indexed: HashSet::new(),
        }
    }

    #[inline]
    fn bucket(&self, p: Vec2) -> (i32, i32) {
        (
            (p.x / self.bucket_size).floor() as i32,
            (p.y / self.bucket_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, tag: &str, entry: SpatialEntry) {
        self.max_radius = self.max_radius.max(entry.radius);
        let key = self.bucket(entry.position);
        self.buckets
            .entry(tag.to_owned())
            .or_default()
            .entry(key)
            .or_default()
            .push(entry);
    }

    /// Whether instances of `tile` have been loaded into the index.
    pub fn is_indexed(&self, tile: TileId) -> bool {
        self.indexed.contains(&tile)
    }

    /// Loads every instance of a tile. No-op if the tile is already indexed.
    pub fn index_tile<'a>(
        &mut self,
        tile: TileId,
        instances: impl IntoIterator<Item = &'a PlacedInstance>,
    ) {
        if !self.indexed.insert(tile) {
            return;
        }
        for instance in instances {
            self.insert(&instance.tag, SpatialEntry::from_instance(tile, instance));
        }
    }

    /// Drops all entries of a tile and marks it for re-indexing.
    pub fn remove_tile(&mut self, tile: TileId) {
        self.indexed.remove(&tile);
        for per_tag in self.buckets.values_mut() {
            for entries in per_tag.values_mut() {
                entries.retain(|e| e.tile != tile);
            }
        }
    }

    /// Drops all entries carrying `identity`. Returns how many were removed.
    pub fn remove_identity(&mut self, identity: ResourceIdentity) -> usize {
        let mut removed = 0;
        for per_tag in self.buckets.values_mut() {
            for entries in per_tag.values_mut() {
                let before = entries.len();
                entries.retain(|e| e.identity != identity);
                removed += before - entries.len();
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.indexed.clear();
        self.max_radius = 0.0;
    }

    pub fn len(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|per_tag| per_tag.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries whose footprint reaches within `radius` of `p`. `None` searches every tag.
    pub fn query_radius(&self, p: Vec2, radius: f32, tags: Option<&[String]>) -> Vec<&SpatialEntry> {
        let reach = radius + self.max_radius;
        let lo = self.bucket(p - Vec2::splat(reach));
        let hi = self.bucket(p + Vec2::splat(reach));
        let mut out = Vec::new();
        match tags {
            Some(tags) => {
                for per_tag in tags.iter().filter_map(|tag| self.buckets.get(tag)) {
                    collect_within(per_tag, lo, hi, p, radius, &mut out);
                }
            }
            None => {
                for per_tag in self.buckets.values() {
                    collect_within(per_tag, lo, hi, p, radius, &mut out);
                }
            }
        }
        out
    }

    /// Whether any footprint reaches within `radius` of `p`.
    pub fn any_within(&self, p: Vec2, radius: f32, tags: Option<&[String]>) -> bool {
        !self.query_radius(p, radius, tags).is_empty()
    }

    /// Every entry of the given tags.
    pub fn entries_for<'a>(&'a self, tags: &'a [String]) -> impl Iterator<Item = &'a SpatialEntry> {
        tags.iter()
            .filter_map(|tag| self.buckets.get(tag))
            .flat_map(|per_tag| per_tag.values())
            .flatten()
    }
}

fn collect_within<'a>(
    per_tag: &'a HashMap<(i32, i32), Vec<SpatialEntry>>,
    lo: (i32, i32),
    hi: (i32, i32),
    p: Vec2,
    radius: f32,
    out: &mut Vec<&'a SpatialEntry>,
) {
    for by in lo.1..=hi.1 {
        for bx in lo.0..=hi.0 {
            let Some(entries) = per_tag.get(&(bx, by)) else {
                continue;
            };
            out.extend(
                entries
                    .iter()
                    .filter(|e| e.position.distance(p) <= radius + e.radius),
            );
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SIZE)
    }
}
