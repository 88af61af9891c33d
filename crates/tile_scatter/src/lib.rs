#![forbid(unsafe_code)]
//! tile_scatter: rule-driven content distribution over tiled terrain.
//!
//! Modules:
//! - tiles: the tile store interface and an in-memory store
//! - raster: canvas grids, rasters and the buffer pool
//! - cache: per-tile read caches, spatial index and collision masks
//! - workspace: stitch the tiles under a world square into one canvas per channel class
//! - mask: mask stacks folded into density fields
//! - spawn: spawn rules, spawners and the simulate/commit engine
//! - area: cooperative iteration over areas larger than one workspace
pub mod area;
pub mod cache;
pub mod error;
pub mod mask;
pub mod raster;
pub mod resource;
pub mod spawn;
pub mod tiles;
pub mod workspace;

/// Convenient re-exports for common types. Import with `use tile_scatter::prelude::*;`.
pub mod prelude {
    pub use crate::area::{
        area_spawn_steps, plan_cells, AreaSpawnConfig, AreaSpawnSummary, AreaSpawnTask,
        CancellationToken, CellPlan, ClearLedger, Progress, ProgressReporter, SpawnArea,
        SpawnContext, Step,
    };
    pub use crate::cache::{CacheStats, DataCache, SpatialIndex};
    pub use crate::error::{Error, Result};
    pub use crate::mask::{
        evaluate_hierarchy, BlendMode, Curve, InfluenceScope, MaskContext, MaskHierarchy,
        MaskNode, MaskOperation, MaskOutput, MaskStack, NoiseKind, NoiseParams, RasterTexture,
        Texture, TextureChannel, TextureRegistry,
    };
    pub use crate::raster::{BufferPool, CanvasGrid, ChannelClass, PixelRect, Raster, WorldRect};
    pub use crate::resource::{
        InstanceKind, PlacedInstance, PrototypeCatalog, PrototypeDescriptor, PrototypeRegistry,
        ResourceIdentity, ResourceType,
    };
    pub use crate::spawn::events::{
        EventSink, FnSink, MultiSink, SpawnEvent, SpawnEventKind, VecSink,
    };
    pub use crate::spawn::{
        derive_rule_seed, AffectedSet, CommitContext, CommitOutcome, ExtensionHandler, FixedSeed,
        ParallelEvaluate, RandomSeedSource, RandomStream, RayonEvaluator, SerialEvaluator,
        SpawnMode, SpawnRule, SpawnRuleEngine, Spawner,
    };
    pub use crate::tiles::{
        ChannelKind, MemoryTile, MemoryTileStore, Tile, TileId, TileLoader, TileScope, TileStore,
    };
    pub use crate::workspace::{Workspace, WorkspaceRequest};
}
