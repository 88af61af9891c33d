use glam::Vec2;
use tile_scatter::prelude::*;
use tile_scatter_examples::{
    demo_registry, forest_spawners, hilly_world, init_tracing, log_sink, render_store_to_png,
    RenderConfig, TILE_SIZE,
};
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut store = hilly_world(2, 2);
    let registry = demo_registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(99);
    let mut sink = log_sink();
    let token = CancellationToken::new();

    let world = WorldRect::from_origin_size(Vec2::ZERO, Vec2::splat(2.0 * TILE_SIZE));
    let mut task = AreaSpawnTask::new(
        forest_spawners(SpawnMode::Add),
        SpawnArea::from_rect(world),
        AreaSpawnConfig::new(TILE_SIZE * 0.25),
    );

    // Drive the task by hand, as a frame loop would, and cancel halfway.
    let summary = {
        let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
            .with_cancellation(token.clone())
            .with_sink(&mut sink);
        let mut frame = 0usize;
        loop {
            frame += 1;
            match task.step(&mut ctx)? {
                Step::Continue(progress) => {
                    if progress.fraction() >= 0.5 && !token.is_cancelled() {
                        info!(
                            "frame {frame}: cancelling at {}/{}",
                            progress.completed, progress.total
                        );
                        token.cancel();
                    }
                }
                Step::Done(summary) => break summary,
            }
        }
    };

    info!(
        "cancelled: {}, cells {}/{}, {} instances kept",
        summary.cancelled, summary.cells_completed, summary.cells_total, summary.instances_placed
    );
    let config = RenderConfig::new((1024, 1024), world)
        .with_splat_colors(vec![[150, 125, 95], [80, 130, 60], [140, 140, 145]]);
    render_store_to_png(&store, &config, "cancel-midway.png")?;
    Ok(())
}
