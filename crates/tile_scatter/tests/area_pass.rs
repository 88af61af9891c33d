use glam::{Vec2, Vec3};
use tile_scatter::area::LOADING_WINDOW_EPSILON;
use tile_scatter::prelude::*;

const TILE: f32 = 64.0;

fn world() -> MemoryTileStore {
    MemoryTileStore::grid(Vec2::ZERO, TILE, 2, 2, 32, |p| p.x * 0.1)
}

fn registry() -> PrototypeCatalog {
    PrototypeCatalog::new()
        .with(PrototypeDescriptor::new(ResourceType::Tree, 0, "oak", 1.0))
        .with(PrototypeDescriptor::new(ResourceType::Detail, 0, "grass", 0.0))
        .with(PrototypeDescriptor::new(ResourceType::Extension, 0, "beacon", 0.5))
        .with(PrototypeDescriptor::new(ResourceType::GameObject, 0, "rock", 1.0))
}

fn whole_world() -> SpawnArea {
    SpawnArea::new(Vec2::splat(TILE), Vec2::splat(2.0 * TILE))
}

fn constant(name: &str, value: f32) -> MaskStack {
    MaskStack::new(name).with_node(MaskNode::constant(value))
}

fn oaks(value: f32) -> SpawnRule {
    SpawnRule::new("oaks", ResourceType::Tree, 0).with_mask(constant("oaks", value))
}

struct Pass {
    summary: AreaSpawnSummary,
    spawners: Vec<Spawner>,
    events: VecSink,
}

fn run_pass(
    store: &mut MemoryTileStore,
    spawners: Vec<Spawner>,
    config: AreaSpawnConfig,
    seed: u64,
) -> Pass {
    run_pass_over(store, spawners, whole_world(), config, seed)
}

fn run_pass_over(
    store: &mut MemoryTileStore,
    spawners: Vec<Spawner>,
    area: SpawnArea,
    config: AreaSpawnConfig,
    seed: u64,
) -> Pass {
    let registry = registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(seed);
    let mut events = VecSink::new();
    let (summary, spawners) = {
        let mut ctx = SpawnContext::new(store, &mut cache, &registry, &textures, &mut seeds)
            .with_evaluator(&SerialEvaluator)
            .with_sink(&mut events);
        let mut task = AreaSpawnTask::new(spawners, area, config);
        let summary = task.run_to_completion(&mut ctx).expect("pass");
        (summary, task.into_spawners())
    };
    Pass {
        summary,
        spawners,
        events,
    }
}

fn positions(store: &MemoryTileStore, kind: InstanceKind) -> Vec<Vec3> {
    store
        .ids()
        .into_iter()
        .filter_map(|id| store.tile(id))
        .flat_map(|t| t.instances(kind).iter().map(|i| i.position))
        .collect()
}

fn tree_positions(store: &MemoryTileStore) -> Vec<Vec3> {
    positions(store, InstanceKind::Tree)
}

fn cleared(events: &VecSink) -> Vec<(TileId, usize)> {
    events
        .as_slice()
        .iter()
        .filter_map(|e| match e {
            SpawnEvent::TileCleared { tile, removed, .. } => Some((*tile, *removed)),
            _ => None,
        })
        .collect()
}

#[test]
fn fixed_seed_reproduces_placements() {
    let spawner = || Spawner::new("forest").with_rule(oaks(0.8).with_failure_rate(0.3));

    let mut a = world();
    let mut b = world();
    let mut c = world();
    run_pass(&mut a, vec![spawner()], AreaSpawnConfig::new(32.0), 42);
    run_pass(&mut b, vec![spawner()], AreaSpawnConfig::new(32.0), 42);
    run_pass(&mut c, vec![spawner()], AreaSpawnConfig::new(32.0), 43);

    let pa = tree_positions(&a);
    assert!(!pa.is_empty());
    assert_eq!(pa, tree_positions(&b));
    assert_ne!(pa, tree_positions(&c));
}

#[test]
fn fixed_seed_reproduces_game_object_placements() {
    let spawner = || {
        Spawner::new("rocks").with_rule(
            SpawnRule::new("rocks", ResourceType::GameObject, 0)
                .with_failure_rate(0.0)
                .with_min_fitness(0.5)
                .with_mask(constant("rocks", 1.0)),
        )
    };

    let mut a = world();
    let mut b = world();
    let first = run_pass(&mut a, vec![spawner()], AreaSpawnConfig::new(32.0), 42);
    let second = run_pass(&mut b, vec![spawner()], AreaSpawnConfig::new(32.0), 42);

    let pa = positions(&a, InstanceKind::GameObject);
    let pb = positions(&b, InstanceKind::GameObject);
    assert!(!pa.is_empty());
    assert_eq!(pa.len(), pb.len());
    assert_eq!(pa, pb);
    assert_eq!(
        first.spawners[0].rules[0].counters.active_instances,
        second.spawners[0].rules[0].counters.active_instances
    );
}

#[test]
fn oblong_area_keeps_placements_inside_the_area() {
    let mut store = world();
    let strip = SpawnArea::new(Vec2::new(TILE, TILE), Vec2::new(2.0 * TILE, TILE * 0.5));
    let spawner = Spawner::new("forest").with_rule(oaks(1.0));
    let pass = run_pass_over(&mut store, vec![spawner], strip, AreaSpawnConfig::new(TILE), 5);

    // Range is half the short side, so the strip is walked as four cells.
    assert_eq!(pass.summary.cells_total, 4);
    let rect = strip.rect();
    let trees = tree_positions(&store);
    assert!(!trees.is_empty());
    for p in trees {
        let p = Vec2::new(p.x, p.z);
        assert!(
            p.cmpge(rect.min).all() && p.cmple(rect.max).all(),
            "{p} outside {rect:?}"
        );
    }
}

#[test]
fn progress_steps_match_the_plan() {
    let spawners = vec![Spawner::new("forest").with_rule(oaks(1.0))];
    let area = SpawnArea::new(Vec2::ZERO, Vec2::splat(3000.0));
    assert_eq!(area_spawn_steps(&area, &spawners, 1000.0), 4);

    let mut store = world();
    let pass = run_pass(&mut store, spawners, AreaSpawnConfig::new(32.0), 1);
    assert_eq!(pass.summary.cells_total, 4);
    assert_eq!(pass.summary.steps_total, 4);
    assert_eq!(pass.summary.steps_completed, 4);
    assert_eq!(pass.summary.cells_completed, 4);
    assert_eq!(pass.events.count(SpawnEventKind::PassStarted), 1);
    assert_eq!(pass.events.count(SpawnEventKind::PassFinished), 1);
}

#[test]
fn add_first_rule_mask_is_corrected_once_per_pass() {
    let mask = MaskStack::new("rule:bad")
        .with_node(MaskNode::constant(0.5).with_blend(BlendMode::Add));
    let spawner = Spawner::new("forest").with_rule(oaks(1.0).with_mask(mask));

    let mut store = world();
    let pass = run_pass(&mut store, vec![spawner], AreaSpawnConfig::new(32.0), 1);
    assert_eq!(pass.events.count(SpawnEventKind::Warning), 1);
    assert_eq!(pass.spawners[0].rules[0].mask.nodes[0].blend, BlendMode::Multiply);
}

#[test]
fn replace_detail_rules_clear_once_and_add() {
    let grass = PrototypeDescriptor::new(ResourceType::Detail, 0, "grass", 0.0);
    let mut store = world();
    store.for_each_tile_mut(|t| {
        t.register(&grass);
        t.fill_channel(&ChannelKind::Detail(0), 3.0).expect("fill");
    });
    let spawner = Spawner::new("meadow")
        .with_mode(SpawnMode::Replace)
        .with_rule(
            SpawnRule::new("grass_a", ResourceType::Detail, 0).with_mask(constant("a", 0.25)),
        )
        .with_rule(
            SpawnRule::new("grass_b", ResourceType::Detail, 0).with_mask(constant("b", 0.5)),
        );

    // Cells smaller than a tile, so every tile is seen by several cells.
    let pass = run_pass(&mut store, vec![spawner], AreaSpawnConfig::new(20.0), 1);
    assert_eq!(pass.summary.cells_total, 16);

    let cleared = cleared(&pass.events);
    assert_eq!(cleared.len(), 4);
    let mut tiles: Vec<TileId> = cleared.iter().map(|(t, _)| *t).collect();
    tiles.sort();
    assert_eq!(tiles, vec![TileId(0), TileId(1), TileId(2), TileId(3)]);
    assert!(cleared.iter().all(|(_, removed)| *removed == 32 * 32));

    for id in store.ids() {
        let layer = store
            .tile(id)
            .and_then(|t| t.read_channel(&ChannelKind::Detail(0)))
            .expect("detail layer");
        assert!(layer.data.iter().all(|v| (v - 0.75).abs() < 1e-5), "tile {id}");
    }
}

#[test]
fn replace_rerun_keeps_counts_and_add_rerun_accumulates() {
    let mut store = world();
    let spawner = Spawner::new("forest")
        .with_mode(SpawnMode::Replace)
        .with_rule(oaks(1.0));
    let first = run_pass(&mut store, vec![spawner], AreaSpawnConfig::new(20.0), 7);
    let placed = tree_positions(&store);
    assert!(!placed.is_empty());
    assert_eq!(cleared(&first.events).len(), 4);

    let second = run_pass(&mut store, first.spawners, AreaSpawnConfig::new(20.0), 7);
    let replaced = tree_positions(&store);
    assert_eq!(replaced.len(), placed.len());
    let removed: usize = cleared(&second.events).iter().map(|(_, n)| n).sum();
    assert_eq!(removed, placed.len());
    assert_eq!(second.summary.items_cleared, placed.len());

    let mut additive = world();
    let spawner = Spawner::new("forest").with_rule(oaks(1.0));
    let first = run_pass(&mut additive, vec![spawner], AreaSpawnConfig::new(20.0), 7);
    let once = tree_positions(&additive).len();
    run_pass(&mut additive, first.spawners, AreaSpawnConfig::new(20.0), 7);
    assert_eq!(tree_positions(&additive).len(), 2 * once);
}

#[test]
fn tiles_outside_the_mask_are_never_written() {
    let mut store = MemoryTileStore::grid(Vec2::ZERO, TILE, 2, 2, 32, |p| {
        if p.x < TILE {
            0.0
        } else {
            100.0
        }
    });
    let rule = SpawnRule::new("highland", ResourceType::Tree, 0).with_mask(
        MaskStack::new("highland").with_node(MaskNode::height(50.0, 150.0, 0.0)),
    );
    let spawner = Spawner::new("forest").with_rule(rule);
    run_pass(&mut store, vec![spawner], AreaSpawnConfig::new(32.0), 3);

    for (id, expect_written) in [(0, false), (1, true), (2, false), (3, true)] {
        let tile = store.memory_tile(TileId(id)).expect("tile");
        assert_eq!(tile.write_count() > 0, expect_written, "tile {id}");
        assert_eq!(
            !tile.instances(InstanceKind::Tree).is_empty(),
            expect_written,
            "tile {id}"
        );
    }
}

#[test]
fn reporter_cancellation_keeps_committed_cells() {
    let mut store = world();
    let registry = registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(5);
    let mut events = VecSink::new();
    let mut reporter = |p: &Progress| p.completed >= 1;

    let summary = {
        let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
            .with_evaluator(&SerialEvaluator)
            .with_reporter(&mut reporter)
            .with_sink(&mut events);
        let spawner = Spawner::new("forest").with_rule(oaks(1.0));
        let mut task = AreaSpawnTask::new(vec![spawner], whole_world(), AreaSpawnConfig::new(32.0));
        let summary = task.run_to_completion(&mut ctx).expect("pass");
        assert!(task.is_finished());
        summary
    };

    assert!(summary.cancelled);
    assert_eq!(summary.cells_completed, 1);
    assert_eq!(summary.cells_total, 4);
    assert_eq!(events.count(SpawnEventKind::CellStarted), 1);
    assert!(!store
        .tile(TileId(0))
        .expect("tile")
        .instances(InstanceKind::Tree)
        .is_empty());
    for id in 1..4 {
        assert_eq!(store.memory_tile(TileId(id)).expect("tile").write_count(), 0);
    }
}

#[test]
fn token_cancelled_before_start_runs_nothing() {
    let mut store = world();
    let registry = registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(5);
    let token = CancellationToken::new();
    token.cancel();

    let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
        .with_cancellation(token.clone());
    let spawner = Spawner::new("forest").with_rule(oaks(1.0));
    let mut task = AreaSpawnTask::new(vec![spawner], whole_world(), AreaSpawnConfig::new(32.0));
    let step = task.step(&mut ctx).expect("step");
    drop(ctx);

    match step {
        Step::Done(summary) => {
            assert!(summary.cancelled);
            assert_eq!(summary.cells_completed, 0);
        }
        Step::Continue(_) => panic!("cancelled pass continued"),
    }
    assert_eq!(store.total_writes(), 0);
}

#[test]
fn cells_without_tiles_are_skipped() {
    let mut store = world();
    let spawner = Spawner::new("forest").with_rule(oaks(1.0));
    let registry = registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(1);
    let mut events = VecSink::new();
    let summary = {
        let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
            .with_evaluator(&SerialEvaluator)
            .with_sink(&mut events);
        // Right half lies beyond the world.
        let area = SpawnArea::new(Vec2::new(2.0 * TILE, TILE), Vec2::new(4.0 * TILE, 2.0 * TILE));
        let mut task = AreaSpawnTask::new(vec![spawner], area, AreaSpawnConfig::new(32.0));
        task.run_to_completion(&mut ctx).expect("pass")
    };
    assert_eq!(summary.cells_total, 8);
    assert_eq!(summary.cells_skipped, 4);
    assert_eq!(summary.cells_completed, 4);
    assert_eq!(summary.steps_completed, summary.steps_total);
    assert_eq!(events.count(SpawnEventKind::CellSkipped), 4);
}

#[test]
fn failing_rule_does_not_stop_the_pass() {
    let mut store = world();
    // No registry entry for game object 9: registration cannot recover.
    let broken = SpawnRule::new("ghost", ResourceType::GameObject, 9).with_mask(constant("g", 1.0));
    let spawner = Spawner::new("forest").with_rule(broken).with_rule(oaks(1.0));
    let pass = run_pass(&mut store, vec![spawner], AreaSpawnConfig::new(32.0), 1);

    assert_eq!(pass.summary.rules_failed, 4);
    assert_eq!(pass.summary.rules_committed, 4);
    assert_eq!(pass.events.count(SpawnEventKind::RuleFailed), 4);
    assert!(!tree_positions(&store).is_empty());
}

#[test]
fn extension_instances_reach_the_handler() {
    let mut store = world();
    let registry = registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(2);
    let mut handled: Vec<PlacedInstance> = Vec::new();
    let rule = SpawnRule::new("beacons", ResourceType::Extension, 0)
        .with_mask(constant("beacons", 1.0))
        .with_location_increment(16.0);
    {
        let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
            .with_extensions(&mut handled);
        let mut task = AreaSpawnTask::new(
            vec![Spawner::new("signals").with_rule(rule)],
            whole_world(),
            AreaSpawnConfig::new(32.0),
        );
        task.run_to_completion(&mut ctx).expect("pass");
    }
    let stored: usize = store
        .ids()
        .into_iter()
        .filter_map(|id| store.tile(id))
        .map(|t| t.instances(InstanceKind::Extension).len())
        .sum();
    assert!(!handled.is_empty());
    assert_eq!(handled.len(), stored);
    assert!(handled.iter().all(|i| i.tag == "beacon"));
}

struct RecordingLoader(Vec<WorldRect>);

impl TileLoader for RecordingLoader {
    fn set_loading_window(&mut self, window: WorldRect) {
        self.0.push(window);
    }
}

#[test]
fn dynamic_loading_recenters_the_window_per_cell() {
    let mut store = world();
    let registry = registry();
    let textures = TextureRegistry::new();
    let mut cache = DataCache::new();
    let mut seeds = FixedSeed(2);
    let mut loader = RecordingLoader(Vec::new());
    {
        let mut ctx = SpawnContext::new(&mut store, &mut cache, &registry, &textures, &mut seeds)
            .with_loader(&mut loader);
        let mut task = AreaSpawnTask::new(
            Vec::new(),
            whole_world(),
            AreaSpawnConfig::new(32.0).with_dynamic_loading(true),
        );
        task.run_to_completion(&mut ctx).expect("pass");
    }
    assert_eq!(loader.0.len(), 4);
    let first = loader.0[0];
    assert!((first.min.x - LOADING_WINDOW_EPSILON).abs() < 1e-4);
    assert!((first.max.x - (2.0 * 32.0 - LOADING_WINDOW_EPSILON)).abs() < 1e-4);
}

#[test]
fn stitched_workspace_reads_back_what_cells_wrote() {
    let mut store = world();
    let rule = SpawnRule::new("grass", ResourceType::Detail, 0).with_mask(
        MaskStack::new("grass").with_node(MaskNode::noise(NoiseParams::default().with_zoom(16.0))),
    );
    run_pass(
        &mut store,
        vec![Spawner::new("meadow").with_rule(rule)],
        AreaSpawnConfig::new(20.0),
        9,
    );

    let mut cache = DataCache::new();
    let mut ws = Workspace::create(
        &store,
        WorkspaceRequest::new(Vec2::splat(TILE), TILE),
        std::sync::Arc::new(BufferPool::new()),
    )
    .expect("workspace");
    ws.collect_details(&store, &mut cache);
    let canvas = ws.detail(0).expect("detail canvas");

    let mut distinct = Vec::new();
    for p in [
        Vec2::new(3.0, 5.0),
        Vec2::new(63.0, 63.0),
        Vec2::new(65.0, 1.0),
        Vec2::new(100.0, 77.0),
        Vec2::new(127.0, 127.0),
    ] {
        let id = store.tile_at(p).expect("tile under point");
        let tile_value = store
            .tile(id)
            .and_then(|t| t.read_channel(&ChannelKind::Detail(0)))
            .expect("detail layer")
            .sample_nearest(p);
        assert_eq!(canvas.sample_nearest(p), tile_value, "at {p}");
        distinct.push(tile_value);
    }
    distinct.dedup();
    assert!(distinct.len() > 1);
}
