//! Bevy plugin for tile_scatter: a world resource, area-pass requests stepped within a
//! per-frame budget, spawner assets, and spawn events as Bevy messages.
#![forbid(unsafe_code)]

use std::sync::Arc;

pub use assets::{parse_spawner_asset, SpawnerAsset, SpawnerAssetLoader};
use bevy::prelude::*;
pub use events::{ChannelSink, SpawnBus, SpawnBusConfig, SpawnEventFilter, SpawnMessage};
pub use textures::ImageTexture;
use tile_scatter::prelude::*;

mod assets;
mod events;
mod textures;

/// Convenient re-exports for common types. Import with `use bevy_tile_scatter::prelude::*;`.
pub mod prelude {
    pub use tile_scatter::prelude::*;

    pub use crate::assets::{parse_spawner_asset, SpawnerAsset, SpawnerAssetLoader};
    pub use crate::events::{
        ChannelSink, SpawnBus, SpawnBusConfig, SpawnEventFilter, SpawnMessage,
    };
    pub use crate::textures::ImageTexture;
    pub use crate::{
        AreaSpawnBudget, AreaSpawnFinished, AreaSpawnJob, AreaSpawnRequest, CancelAreaSpawn,
        ScatterWorld, TileScatterPlugin,
    };
}

/// Bevy plugin providing the world resource, assets, message types, and systems.
pub struct TileScatterPlugin;

/// Tiles, caches and registries every area pass of the app runs against.
#[derive(Resource)]
pub struct ScatterWorld {
    pub store: Box<dyn TileStore + Send + Sync>,
    pub cache: DataCache,
    pub registry: PrototypeCatalog,
    pub textures: Arc<TextureRegistry>,
    pub pool: Arc<BufferPool>,
}

impl Default for ScatterWorld {
    fn default() -> Self {
        Self::new(MemoryTileStore::new())
    }
}

impl ScatterWorld {
    pub fn new(store: impl TileStore + Send + Sync + 'static) -> Self {
        Self {
            store: Box::new(store),
            cache: DataCache::new(),
            registry: PrototypeCatalog::new(),
            textures: Arc::new(TextureRegistry::new()),
            pool: Arc::new(BufferPool::new()),
        }
    }

    pub fn with_registry(mut self, registry: PrototypeCatalog) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_textures(mut self, textures: TextureRegistry) -> Self {
        self.textures = Arc::new(textures);
        self
    }

    pub fn store(&self) -> &dyn TileStore {
        self.store.as_ref()
    }
}

/// Steps each running area pass may take per frame.
#[derive(Resource, Clone, Copy, Debug)]
pub struct AreaSpawnBudget {
    pub steps_per_frame: usize,
}

impl Default for AreaSpawnBudget {
    fn default() -> Self {
        Self { steps_per_frame: 1 }
    }
}

/// A request to run an area pass with the spawners of a [`SpawnerAsset`].
#[non_exhaustive]
#[derive(EntityEvent)]
pub struct AreaSpawnRequest {
    /// Entity used to track the request.
    pub entity: Entity,
    pub spawners: Handle<SpawnerAsset>,
    pub area: SpawnArea,
    pub config: AreaSpawnConfig,
    /// Pass seed; equal seeds over equal tiles reproduce the same content.
    pub seed: u64,
}

impl AreaSpawnRequest {
    pub fn new(
        entity: Entity,
        spawners: Handle<SpawnerAsset>,
        area: SpawnArea,
        config: AreaSpawnConfig,
        seed: u64,
    ) -> Self {
        Self {
            entity,
            spawners,
            area,
            config,
            seed,
        }
    }
}

/// Cancels the pass running on `entity`. Cells committed so far are kept.
#[derive(EntityEvent, Clone, Copy, Debug)]
pub struct CancelAreaSpawn {
    pub entity: Entity,
}

/// A running area pass, added to the request entity.
#[derive(Component)]
pub struct AreaSpawnJob {
    task: Option<AreaSpawnTask>,
    seeds: FixedSeed,
    cancel: CancellationToken,
    filter: SpawnEventFilter,
}

impl AreaSpawnJob {
    /// Steps done so far, `None` once the pass has been handed back.
    pub fn progress(&self) -> Option<Progress> {
        self.task.as_ref().map(AreaSpawnTask::progress)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// [`EntityEvent`] triggered when an area pass has finished, was cancelled, or failed to start.
#[non_exhaustive]
#[derive(EntityEvent, Clone, Debug)]
pub struct AreaSpawnFinished {
    /// Entity associated with the original request.
    pub entity: Entity,
    pub summary: AreaSpawnSummary,
    /// Spawners with their counters after the pass, ready for a rerun.
    pub spawners: Vec<Spawner>,
    /// Set when the pass could not run, e.g. on invalid configuration.
    pub error: Option<String>,
}

impl Plugin for TileScatterPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<SpawnMessage>()
            .init_asset::<SpawnerAsset>()
            .init_asset_loader::<SpawnerAssetLoader>()
            .init_resource::<ScatterWorld>()
            .init_resource::<AreaSpawnBudget>()
            .init_resource::<SpawnBusConfig>()
            .init_resource::<SpawnBus>()
            .add_systems(Update, (step_area_spawns, drain_spawn_messages).chain())
            .add_observer(start_area_spawn)
            .add_observer(cancel_area_spawn);
    }
}

fn start_area_spawn(
    request: On<AreaSpawnRequest>,
    mut commands: Commands,
    bus_config: Res<SpawnBusConfig>,
    assets: Res<Assets<SpawnerAsset>>,
    jobs: Query<(), With<AreaSpawnJob>>,
) {
    let entity = request.entity;

    if jobs.contains(entity) {
        warn!("AreaSpawnRequest ignored, {:?} already runs a pass.", entity);
        return;
    }
    if let Err(err) = request.config.validate().and(request.area.validate()) {
        warn!("AreaSpawnRequest invalid for {:?}: {}", entity, err);
        return;
    }
    let Some(asset) = assets.get(&request.spawners) else {
        error!("SpawnerAsset not loaded yet: {:?}", request.spawners);
        return;
    };

    let task = AreaSpawnTask::new(
        asset.spawners.clone(),
        request.area,
        request.config.clone(),
    );
    commands.entity(entity).insert(AreaSpawnJob {
        task: Some(task),
        seeds: FixedSeed(request.seed),
        cancel: CancellationToken::new(),
        filter: bus_config.filter.clone(),
    });
}

fn cancel_area_spawn(cancel: On<CancelAreaSpawn>, jobs: Query<&AreaSpawnJob>) {
    if let Ok(job) = jobs.get(cancel.entity) {
        job.cancel.cancel();
    }
}

fn step_area_spawns(
    mut commands: Commands,
    budget: Res<AreaSpawnBudget>,
    bus: Res<SpawnBus>,
    mut world: ResMut<ScatterWorld>,
    mut jobs: Query<(Entity, &mut AreaSpawnJob)>,
) {
    let ScatterWorld {
        store,
        cache,
        registry,
        textures,
        pool,
    } = &mut *world;

    for (entity, mut job) in jobs.iter_mut() {
        let job = &mut *job;
        let Some(task) = job.task.as_mut() else {
            continue;
        };
        let mut sink = bus.sink(entity, job.filter.clone());
        let mut ctx = SpawnContext::new(
            &mut **store,
            &mut *cache,
            &*registry,
            &**textures,
            &mut job.seeds,
        )
        .with_pool(pool.clone())
        .with_cancellation(job.cancel.clone())
        .with_sink(&mut sink);

        let mut outcome = None;
        for _ in 0..budget.steps_per_frame.max(1) {
            match task.step(&mut ctx) {
                Ok(Step::Continue(_)) => {}
                Ok(Step::Done(summary)) => {
                    outcome = Some((summary, None));
                    break;
                }
                Err(err) => {
                    error!("Area pass of {:?} failed: {}", entity, err);
                    outcome = Some((AreaSpawnSummary::default(), Some(err.to_string())));
                    break;
                }
            }
        }
        drop(ctx);

        if let Some((summary, error)) = outcome {
            let spawners = job
                .task
                .take()
                .map(AreaSpawnTask::into_spawners)
                .unwrap_or_default();
            commands.entity(entity).remove::<AreaSpawnJob>();
            commands.trigger(AreaSpawnFinished {
                entity,
                summary,
                spawners,
                error,
            });
        }
    }
}

fn drain_spawn_messages(bus: Res<SpawnBus>, mut messages: ResMut<Messages<SpawnMessage>>) {
    while let Ok(message) = bus.receiver().try_recv() {
        messages.write(message);
    }
}
