//! Seeded point placement on a world-aligned lattice.
//!
//! Candidates sit at multiples of the rule's `location_increment` inside the cell square, so
//! adjacent cells never test the same lattice point twice. Each candidate consumes random draws
//! in a fixed order: two jitter draws, then a failure draw once it passes the fitness test, then
//! rotation and scale draws once it is accepted.
use glam::{Vec2, Vec3};

use super::random::RandomStream;
use super::rule::SpawnRule;
use crate::cache::collision::BAKED_MASK_THRESHOLD;
use crate::cache::SpatialIndex;
use crate::mask::{Curve, TextureRegistry};
use crate::raster::{Raster, WorldRect};
use crate::resource::{PlacedInstance, ResourceIdentity};

/// Baked masks whose name starts with this prefix count as foreign colliders for virgin
/// terrain checks.
pub const COLLIDER_MASK_PREFIX: &str = "collider:";

/// Receives every placed extension instance.
pub trait ExtensionHandler {
    fn on_instance(&mut self, rule: &SpawnRule, instance: &PlacedInstance);
}

impl ExtensionHandler for Vec<PlacedInstance> {
    fn on_instance(&mut self, _rule: &SpawnRule, instance: &PlacedInstance) {
        self.push(instance.clone());
    }
}

/// Identity, tag and footprint stamped onto every placement of a rule.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacementStamp {
    pub identity: ResourceIdentity,
    pub tag: String,
    pub radius: f32,
}

/// Read-only inputs of a placement run.
pub struct PlacementInputs<'a> {
    /// Cell square; candidates outside are not considered.
    pub square: WorldRect,
    pub center: Vec2,
    pub range: f32,
    /// Rule density on the height canvas.
    pub field: &'a Raster,
    pub heights: Option<&'a Raster>,
    /// Bounds of the tiles that may receive placements.
    pub targets: &'a [WorldRect],
    pub distance_curve: &'a Curve,
    pub textures: &'a TextureRegistry,
    pub spatial: &'a SpatialIndex,
    /// Baked collider masks on the height canvas.
    pub colliders: Vec<&'a Raster>,
}

/// Placements and rejection counters of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlacementResult {
    pub placements: Vec<PlacedInstance>,
    pub candidates: usize,
    pub below_fitness: usize,
    pub failed: usize,
    pub blocked: usize,
    /// Placement stopped at the rule's instance cap.
    pub capped: bool,
}

/// Lattice coordinates `k * step` inside `[min, max)`.
fn lattice(min: f32, max: f32, step: f32) -> impl Iterator<Item = f32> {
    let first = (min / step).ceil() as i64;
    let last = (max / step).ceil() as i64;
    (first..last)
        .map(move |k| k as f32 * step)
        .filter(move |v| *v >= min && *v < max)
}

/// Places instances of `rule`, updating its counters.
pub fn place_instances(
    inputs: &PlacementInputs<'_>,
    rule: &mut SpawnRule,
    stamp: &PlacementStamp,
    rng: &mut RandomStream,
) -> PlacementResult {
    let mut result = PlacementResult::default();
    let step = rule.location_increment;
    if step.is_nan() || step <= 0.0 || inputs.targets.is_empty() {
        return result;
    }
    let spread = rule.jitter.clamp(0.0, 1.0) * step;
    let xs: Vec<f32> = lattice(inputs.square.min.x, inputs.square.max.x, step).collect();
    let zs: Vec<f32> = lattice(inputs.square.min.y, inputs.square.max.y, step).collect();

    'lattice: for &z in &zs {
        for &x in &xs {
            let jx = (rng.rand01() - 0.5) * spread;
            let jz = (rng.rand01() - 0.5) * spread;
            let p = Vec2::new(x + jx, z + jz);
            result.candidates += 1;
            if !inputs.square.contains(p) || !inputs.targets.iter().any(|b| b.contains(p)) {
                result.below_fitness += 1;
                continue;
            }

            let fitness = fitness_at(inputs, rule, p);
            if fitness <= rule.min_fitness {
                result.below_fitness += 1;
                continue;
            }

            if rng.rand01() < rule.failure_rate {
                result.failed += 1;
                continue;
            }

            if !rule.ignore_max_instances && rule.counters.active_instances >= rule.max_instances {
                result.capped = true;
                break 'lattice;
            }

            if rule.require_virgin && !is_virgin(inputs, &result.placements, p, rule.virgin_radius)
            {
                result.blocked += 1;
                continue;
            }

            let rotation = if rule.random_rotation {
                rng.rand01() * 360.0
            } else {
                0.0
            };
            let scale = rng.range(rule.min_scale, rule.max_scale);
            let y = inputs.heights.map_or(0.0, |h| h.sample_bilinear(p));
            result.placements.push(PlacedInstance {
                identity: stamp.identity,
                resource_type: rule.resource_type,
                index: rule.resource_index,
                tag: stamp.tag.clone(),
                position: Vec3::new(p.x, y, p.y),
                rotation_degrees: rotation,
                scale,
                radius: stamp.radius * scale,
            });
            rule.counters.active_instances += 1;
            rule.counters.placed_last_pass += 1;
        }
    }
    result
}

fn fitness_at(inputs: &PlacementInputs<'_>, rule: &SpawnRule, p: Vec2) -> f32 {
    let density = inputs.field.sample_bilinear(p);
    let t = if inputs.range > 0.0 {
        (p.distance(inputs.center) / inputs.range).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let attenuation = inputs.distance_curve.evaluate(t);
    let area = match &rule.area_mask {
        Some(mask) => inputs
            .textures
            .sample(&mask.texture_id, mask.channel, p)
            .clamp(0.0, 1.0),
        None => 1.0,
    };
    density * attenuation * area
}

fn is_virgin(
    inputs: &PlacementInputs<'_>,
    pending: &[PlacedInstance],
    p: Vec2,
    radius: f32,
) -> bool {
    if inputs
        .colliders
        .iter()
        .any(|mask| mask.sample_nearest(p) > BAKED_MASK_THRESHOLD)
    {
        return false;
    }
    if inputs.spatial.any_within(p, radius, None) {
        return false;
    }
    !pending.iter().any(|i| {
        Vec2::new(i.position.x, i.position.z).distance(p) <= radius + i.radius
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SpatialEntry;
    use crate::raster::CanvasGrid;
    use crate::resource::ResourceType;
    use crate::tiles::TileId;

    fn square() -> WorldRect {
        WorldRect::from_origin_size(Vec2::ZERO, Vec2::splat(16.0))
    }

    fn field(value: f32) -> Raster {
        Raster::filled(CanvasGrid::new(Vec2::ZERO, 1.0, 16, 16), value)
    }

    fn stamp() -> PlacementStamp {
        PlacementStamp {
            identity: ResourceIdentity::derive(ResourceType::Tree, "oak"),
            tag: "oak".into(),
            radius: 1.0,
        }
    }

    fn run(
        rule: &mut SpawnRule,
        field: &Raster,
        spatial: &SpatialIndex,
        colliders: Vec<&Raster>,
        seed: u64,
    ) -> PlacementResult {
        let targets = [square()];
        let curve = Curve::constant(1.0);
        let textures = TextureRegistry::new();
        let inputs = PlacementInputs {
            square: square(),
            center: Vec2::splat(8.0),
            range: 8.0,
            field,
            heights: None,
            targets: &targets,
            distance_curve: &curve,
            textures: &textures,
            spatial,
            colliders,
        };
        place_instances(&inputs, rule, &stamp(), &mut RandomStream::new(seed))
    }

    #[test]
    fn lattice_is_half_open_and_world_aligned() {
        let v: Vec<f32> = lattice(2.0, 10.0, 4.0).collect();
        assert_eq!(v, vec![4.0, 8.0]);
        let v: Vec<f32> = lattice(-4.0, 4.0, 4.0).collect();
        assert_eq!(v, vec![-4.0, 0.0]);
    }

    #[test]
    fn same_seed_places_identically() {
        let f = field(0.8);
        let spatial = SpatialIndex::default();
        let mut a = SpawnRule::new("oaks", ResourceType::Tree, 0).with_failure_rate(0.3);
        let mut b = a.clone();
        let ra = run(&mut a, &f, &spatial, Vec::new(), 11);
        let rb = run(&mut b, &f, &spatial, Vec::new(), 11);
        assert!(!ra.placements.is_empty());
        assert_eq!(ra.placements, rb.placements);
        assert_eq!(a.counters, b.counters);
    }

    #[test]
    fn fitness_gate_is_strict() {
        let f = field(0.5);
        let spatial = SpatialIndex::default();
        let mut rule = SpawnRule::new("oaks", ResourceType::Tree, 0).with_min_fitness(0.5);
        let result = run(&mut rule, &f, &spatial, Vec::new(), 1);
        assert!(result.placements.is_empty());
        assert_eq!(result.below_fitness, result.candidates);
    }

    #[test]
    fn cap_stops_placement() {
        let f = field(1.0);
        let spatial = SpatialIndex::default();
        let mut rule = SpawnRule::new("oaks", ResourceType::Tree, 0)
            .with_jitter(0.0)
            .with_max_instances(3);
        let result = run(&mut rule, &f, &spatial, Vec::new(), 1);
        assert_eq!(result.placements.len(), 3);
        assert!(result.capped);

        let mut unlimited = SpawnRule::new("oaks", ResourceType::Tree, 0)
            .with_jitter(0.0)
            .with_max_instances(3)
            .with_ignore_max_instances(true);
        let result = run(&mut unlimited, &f, &spatial, Vec::new(), 1);
        assert_eq!(result.placements.len(), 16);
    }

    #[test]
    fn virgin_terrain_avoids_instances_and_colliders() {
        let f = field(1.0);
        let mut spatial = SpatialIndex::default();
        spatial.insert(
            "rock",
            SpatialEntry {
                tile: TileId(0),
                identity: ResourceIdentity::derive(ResourceType::GameObject, "rock"),
                position: Vec2::new(4.0, 4.0),
                radius: 1.0,
            },
        );
        let mut collider = field(0.0);
        for iy in 12..16 {
            for ix in 0..16 {
                collider.set(ix, iy, 1.0);
            }
        }
        let mut rule = SpawnRule::new("oaks", ResourceType::Tree, 0)
            .with_jitter(0.0)
            .with_virgin_terrain(1.0);
        let result = run(&mut rule, &f, &spatial, vec![&collider], 1);
        assert!(result.blocked > 0);
        for placed in &result.placements {
            let p = Vec2::new(placed.position.x, placed.position.z);
            assert!(p.distance(Vec2::new(4.0, 4.0)) > 2.0);
            assert!(p.y < 12.0);
        }
    }
}
