use glam::Vec2;
use tile_scatter::prelude::*;
use tile_scatter_examples::{
    demo_registry, forest_spawners, hilly_world, init_tracing, log_sink, render_store_to_png,
    InstanceStyle, RenderConfig, TILE_SIZE,
};
use tracing::info;

fn count_instances(store: &MemoryTileStore) -> usize {
    store
        .ids()
        .into_iter()
        .filter_map(|id| store.tile(id))
        .map(|t| {
            t.instances(InstanceKind::Tree).len() + t.instances(InstanceKind::GameObject).len()
        })
        .sum()
}

fn run(
    store: &mut MemoryTileStore,
    spawners: Vec<Spawner>,
    seed: u64,
) -> anyhow::Result<(AreaSpawnSummary, Vec<Spawner>)> {
    let registry = demo_registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(seed);
    let mut sink = log_sink();
    let mut ctx = SpawnContext::new(store, &mut cache, &registry, &textures, &mut seeds)
        .with_sink(&mut sink);
    let area = SpawnArea::new(Vec2::splat(TILE_SIZE), Vec2::splat(2.0 * TILE_SIZE));
    let mut task = AreaSpawnTask::new(spawners, area, AreaSpawnConfig::new(TILE_SIZE * 0.5));
    let summary = task.run_to_completion(&mut ctx)?;
    Ok((summary, task.into_spawners()))
}

fn render(store: &MemoryTileStore, path: &str) -> anyhow::Result<()> {
    let world = WorldRect::from_origin_size(Vec2::ZERO, Vec2::splat(2.0 * TILE_SIZE));
    let config = RenderConfig::new((768, 768), world)
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
        );
    render_store_to_png(store, &config, path)
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    // Replace: a rerun clears what the previous pass placed before writing again.
    let mut store = hilly_world(2, 2);
    let (first, spawners) = run(&mut store, forest_spawners(SpawnMode::Replace), 1)?;
    let after_first = count_instances(&store);
    render(&store, "replace-mode-first.png")?;

    let (second, _) = run(&mut store, spawners, 2)?;
    let after_second = count_instances(&store);
    render(&store, "replace-mode-second.png")?;
    info!(
        "replace: {after_first} instances, then {after_second} ({} cleared, {} placed)",
        second.items_cleared, second.instances_placed
    );
    info!(
        "first pass cleared {} items, second pass {}",
        first.items_cleared, second.items_cleared
    );

    // Add: the same rerun stacks a second forest on the first.
    let mut store = hilly_world(2, 2);
    let (_, spawners) = run(&mut store, forest_spawners(SpawnMode::Add), 1)?;
    let once = count_instances(&store);
    run(&mut store, spawners, 2)?;
    let twice = count_instances(&store);
    render(&store, "add-mode-second.png")?;
    info!("add: {once} instances, then {twice}");

    Ok(())
}
