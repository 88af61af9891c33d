use glam::Vec2;
use tile_scatter::prelude::*;
use tracing::{debug, info, warn};

pub const TILE_SIZE: f32 = 256.0;
pub const TILE_RESOLUTION: u32 = 128;

fn terrain_height(p: Vec2) -> f32 {
    let ridge = (p.x * 0.012).sin() * (p.y * 0.009).cos();
    let bumps = (p.x * 0.05 + p.y * 0.031).sin() * 0.15;
    let valley = ((p - Vec2::splat(TILE_SIZE)).length() / TILE_SIZE).min(1.0);
    30.0 * (ridge + bumps) + 40.0 * valley
}

/// A `columns × rows` grid of hilly tiles starting at the origin.
pub fn hilly_world(columns: u32, rows: u32) -> MemoryTileStore {
    MemoryTileStore::grid(
        Vec2::ZERO,
        TILE_SIZE,
        columns,
        rows,
        TILE_RESOLUTION,
        terrain_height,
    )
}

/// Prototypes used by [`forest_spawners`].
pub fn demo_registry() -> PrototypeCatalog {
    PrototypeCatalog::new()
        .with(PrototypeDescriptor::new(ResourceType::Texture, 0, "soil", 0.0))
        .with(PrototypeDescriptor::new(ResourceType::Texture, 1, "moss", 0.0))
        .with(PrototypeDescriptor::new(ResourceType::Texture, 2, "rock", 0.0))
        .with(PrototypeDescriptor::new(ResourceType::Detail, 0, "grass", 0.0))
        .with(PrototypeDescriptor::new(ResourceType::Tree, 0, "oak", 2.5))
        .with(PrototypeDescriptor::new(ResourceType::Tree, 1, "pine", 1.5))
        .with(PrototypeDescriptor::new(ResourceType::GameObject, 0, "boulder", 3.0))
}

/// Ground cover followed by a forest, both in `mode`.
pub fn forest_spawners(mode: SpawnMode) -> Vec<Spawner> {
    let patches = NoiseParams::default().with_zoom(90.0).with_seed(7);
    let clearings = NoiseParams::default()
        .with_kind(NoiseKind::Billow)
        .with_zoom(160.0)
        .with_seed(21);

    let ground = Spawner::new("ground")
        .with_mode(mode)
        .with_rule(
            SpawnRule::new("moss", ResourceType::Texture, 1).with_mask(
                MaskStack::new("moss")
                    .with_node(MaskNode::height(-40.0, 30.0, 10.0))
                    .with_node(MaskNode::noise(patches.clone())),
            ),
        )
        .with_rule(
            SpawnRule::new("rock", ResourceType::Texture, 2)
                .with_mask(MaskStack::new("rock").with_node(MaskNode::slope(18.0, 90.0, 6.0))),
        )
        .with_rule(
            SpawnRule::new("grass", ResourceType::Detail, 0)
                .with_strength(2.0)
                .with_mask(
                    MaskStack::new("grass")
                        .with_node(MaskNode::splat_layer(1))
                        .with_node(MaskNode::slope(0.0, 15.0, 5.0)),
                ),
        );

    let forest = Spawner::new("forest")
        .with_mode(mode)
        .with_mask(MaskStack::new("forest").with_node(MaskNode::noise(clearings)))
        .with_distance_curve(Curve::from_keys([(0.0, 1.0), (0.8, 1.0), (1.0, 0.6)]))
        .with_rule(
            SpawnRule::new("oaks", ResourceType::Tree, 0)
                .with_location_increment(9.0)
                .with_min_fitness(0.35)
                .with_failure_rate(0.3)
                .with_scale_range(0.8, 1.3)
                .with_mask(
                    MaskStack::new("oaks")
                        .with_node(MaskNode::height(-40.0, 25.0, 8.0))
                        .with_node(MaskNode::slope(0.0, 20.0, 5.0)),
                ),
        )
        .with_rule(
            SpawnRule::new("pines", ResourceType::Tree, 1)
                .with_location_increment(7.0)
                .with_min_fitness(0.3)
                .with_failure_rate(0.4)
                .with_mask(
                    MaskStack::new("pines")
                        .with_node(MaskNode::height(20.0, 90.0, 8.0))
                        .with_node(MaskNode::collision(["oak"], 4.0)),
                ),
        )
        .with_rule(
            SpawnRule::new("boulders", ResourceType::GameObject, 0)
                .with_location_increment(24.0)
                .with_failure_rate(0.6)
                .with_virgin_terrain(6.0)
                .with_mask(MaskStack::new("boulders").with_node(MaskNode::splat_layer(2))),
        );

    vec![ground, forest]
}

/// Sink logging the events worth a line in a demo run.
pub fn log_sink() -> FnSink<impl FnMut(SpawnEvent)> {
    FnSink::new(|event| match event {
        SpawnEvent::CellSkipped { index, reason, .. } => {
            warn!("cell {index} skipped: {reason}");
        }
        SpawnEvent::TileCleared {
            tile,
            resource_type,
            removed,
            ..
        } => {
            info!("cleared {removed} {resource_type} items from tile {tile}");
        }
        SpawnEvent::RuleCommitted {
            spawner,
            rule,
            tiles_written,
            instances_placed,
        } => {
            debug!("{spawner}/{rule}: {tiles_written} tiles, {instances_placed} instances");
        }
        SpawnEvent::RuleFailed {
            spawner,
            rule,
            message,
            ..
        } => {
            warn!("{spawner}/{rule} failed: {message}");
        }
        _ => {}
    })
}
