//! Area passes: spawners run cell by cell over areas larger than one workspace.
//!
//! An area is split into cells ([`plan_cells`]). Each cell opens a [`crate::workspace::Workspace`],
//! clears Replace-mode content once per tile and identity for the whole pass, then runs every
//! spawner's rules. [`AreaSpawnTask`] does this cooperatively, one spawner per step.
pub mod layout;
pub mod ledger;
pub mod progress;
pub mod task;

pub use layout::{area_spawn_steps, plan_cells, CellPlan, SpawnArea};
pub use ledger::ClearLedger;
pub use progress::{CancellationToken, Progress, ProgressReporter};
pub use task::{
    AreaSpawnConfig, AreaSpawnSummary, AreaSpawnTask, SpawnContext, Step, LOADING_WINDOW_EPSILON,
};
