//! Spawn rules, spawners and their two-phase execution.
//!
//! A rule is evaluated into a density field on its workspace canvas, [`simulate`]d to find the
//! tiles it would write, and committed only into those tiles.
pub mod commit;
pub mod engine;
pub mod events;
pub mod placement;
pub mod random;
pub mod rule;
pub mod simulate;

pub use commit::{CommitContext, CommitOutcome, CommitSettings, MAX_DETAIL_DENSITY};
pub use engine::{RuleRun, SpawnRuleEngine};
pub use placement::{
    place_instances, ExtensionHandler, PlacementInputs, PlacementResult, PlacementStamp,
    COLLIDER_MASK_PREFIX,
};
pub use random::{derive_rule_seed, FixedSeed, RandomSeedSource, RandomStream};
pub use rule::{AreaMask, ModeOverride, RuleCounters, SpawnMode, SpawnRule, Spawner};
pub use simulate::{simulate, AffectedSet, ParallelEvaluate, RayonEvaluator, SerialEvaluator};
