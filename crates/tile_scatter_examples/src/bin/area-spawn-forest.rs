use glam::Vec2;
use tile_scatter::prelude::*;
use tile_scatter_examples::{
    demo_registry, forest_spawners, hilly_world, init_tracing, log_sink, render_store_to_png,
    InstanceStyle, RenderConfig, TILE_SIZE,
};
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    // 2×2 tiles, spawned in cells half a tile wide so every cell stitches neighbours.
    let mut store = hilly_world(2, 2);
    let registry = demo_registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(2024);
    let mut sink = log_sink();
    let mut reporter = |p: &Progress| {
        info!("{:>5.1}% {}", p.fraction() * 100.0, p.label);
        false
    };

    let world = WorldRect::from_origin_size(Vec2::ZERO, Vec2::splat(2.0 * TILE_SIZE));
    let summary = {
        let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
            .with_reporter(&mut reporter)
            .with_sink(&mut sink);
        let mut task = AreaSpawnTask::new(
            forest_spawners(SpawnMode::Add),
            SpawnArea::from_rect(world),
            AreaSpawnConfig::new(TILE_SIZE * 0.25),
        );
        task.run_to_completion(&mut ctx)?
    };
    info!(
        "{} cells, {} rules committed, {} instances, {} tile writes",
        summary.cells_completed, summary.rules_committed, summary.instances_placed,
        summary.tiles_written
    );
    let stats = cache.stats();
    info!("cache: {} hits, {} misses", stats.hits, stats.misses);

    let config = RenderConfig::new((1024, 1024), world)
        .with_splat_colors(vec![[150, 125, 95], [80, 130, 60], [140, 140, 145]])
        .with_style(
            "oak",
            InstanceStyle {
                color: [30, 90, 30],
                min_radius_px: 3,
            },
        )
        .with_style(
            "pine",
            InstanceStyle {
                color: [20, 60, 50],
                min_radius_px: 2,
            },
        )
        .with_style(
            "boulder",
            InstanceStyle {
                color: [200, 200, 205],
                min_radius_px: 4,
            },
        );
    render_store_to_png(&store, &config, "area-spawn-forest.png")?;
    Ok(())
}
