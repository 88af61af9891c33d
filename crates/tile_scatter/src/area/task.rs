//! Cooperative area passes.
//!
//! [`AreaSpawnTask::step`] advances a pass by at most one spawner and returns at every
//! suspension point, so hosts can spread a pass over frames and cancel it in between.
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::layout::{area_spawn_steps, plan_cells, CellPlan, SpawnArea};
use super::ledger::ClearLedger;
use super::progress::{CancellationToken, Progress, ProgressReporter};
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::mask::TextureRegistry;
use crate::raster::BufferPool;
use crate::resource::PrototypeRegistry;
use crate::spawn::events::{EventSink, SpawnEvent, SpawnEventKind};
use crate::spawn::{
    CommitContext, ExtensionHandler, ParallelEvaluate, RandomSeedSource, RandomStream,
    RayonEvaluator, SpawnMode, SpawnRuleEngine, Spawner,
};
use crate::tiles::{TileId, TileLoader, TileStore};
use crate::workspace::{Workspace, WorkspaceRequest};

/// Inset of the loader window relative to the cell square.
pub const LOADING_WINDOW_EPSILON: f32 = 0.01;

static GLOBAL_EVALUATOR: RayonEvaluator = RayonEvaluator::new();

/// Configuration of an area pass.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct AreaSpawnConfig {
    /// Largest cell range; areas wider than twice this are split into cells.
    pub max_range: f32,
    /// Let neighbouring tiles contribute to each cell's workspace.
    pub include_multi_tile: bool,
    /// Restricts contributing tiles by name.
    pub valid_tile_names: Option<Vec<String>>,
    /// Recenter the [`TileLoader`] window on every cell.
    pub dynamic_loading: bool,
}

impl Default for AreaSpawnConfig {
    fn default() -> Self {
        Self {
            max_range: 1000.0,
            include_multi_tile: true,
            valid_tile_names: None,
            dynamic_loading: false,
        }
    }
}

impl AreaSpawnConfig {
    pub fn new(max_range: f32) -> Self {
        Self {
            max_range,
            ..Default::default()
        }
    }

    pub fn with_max_range(mut self, max_range: f32) -> Self {
        self.max_range = max_range;
        self
    }

    pub fn with_multi_tile(mut self, include: bool) -> Self {
        self.include_multi_tile = include;
        self
    }

    pub fn with_valid_tile_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.valid_tile_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dynamic_loading(mut self, dynamic_loading: bool) -> Self {
        self.dynamic_loading = dynamic_loading;
        self
    }

    /// Validates the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_range.is_nan() || self.max_range <= 0.0 {
            return Err(Error::InvalidConfig("max_range must be > 0".into()));
        }
        Ok(())
    }
}

/// Outcome of an area pass.
#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AreaSpawnSummary {
    pub pass_seed: u64,
    pub cells_total: usize,
    pub cells_completed: usize,
    pub cells_skipped: usize,
    pub steps_total: usize,
    pub steps_completed: usize,
    pub rules_committed: usize,
    pub rules_failed: usize,
    pub tiles_written: usize,
    pub instances_placed: usize,
    /// Instances or detail pixels removed by Replace mode.
    pub items_cleared: usize,
    /// The pass stopped early; cells committed before that are kept.
    pub cancelled: bool,
}

/// Result of one [`AreaSpawnTask::step`].
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Continue(Progress),
    Done(AreaSpawnSummary),
}

/// Host services of an area pass.
pub struct SpawnContext<'a> {
    pub store: &'a mut dyn TileStore,
    pub cache: &'a mut DataCache,
    pub pool: Arc<BufferPool>,
    pub registry: &'a dyn PrototypeRegistry,
    pub textures: &'a TextureRegistry,
    pub evaluator: &'a dyn ParallelEvaluate,
    pub seeds: &'a mut dyn RandomSeedSource,
    pub loader: Option<&'a mut dyn TileLoader>,
    pub reporter: Option<&'a mut dyn ProgressReporter>,
    pub cancel: CancellationToken,
    pub extensions: Option<&'a mut dyn ExtensionHandler>,
    pub sink: Option<&'a mut dyn EventSink>,
}

impl<'a> SpawnContext<'a> {
    /// A context evaluating on rayon's global pool with a fresh buffer pool.
    pub fn new(
        store: &'a mut dyn TileStore,
        cache: &'a mut DataCache,
        registry: &'a dyn PrototypeRegistry,
        textures: &'a TextureRegistry,
        seeds: &'a mut dyn RandomSeedSource,
    ) -> Self {
        Self {
            store,
            cache,
            pool: Arc::new(BufferPool::new()),
            registry,
            textures,
            evaluator: &GLOBAL_EVALUATOR,
            seeds,
            loader: None,
            reporter: None,
            cancel: CancellationToken::new(),
            extensions: None,
            sink: None,
        }
    }

    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn ParallelEvaluate) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_loader(mut self, loader: &'a mut dyn TileLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_reporter(mut self, reporter: &'a mut dyn ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_extensions(mut self, extensions: &'a mut dyn ExtensionHandler) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn with_sink(mut self, sink: &'a mut dyn EventSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

fn event_sink<'s>(
    sink: &'s mut Option<&mut dyn EventSink>,
    silent: &'s mut (),
) -> &'s mut dyn EventSink {
    match sink {
        Some(s) => &mut **s,
        None => silent,
    }
}

/// Workspace of the cell in flight.
struct OpenCell {
    cell: CellPlan,
    workspace: Workspace,
    next_spawner: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Finished,
}

/// A resumable pass of spawners over an area.
pub struct AreaSpawnTask {
    spawners: Vec<Spawner>,
    area: SpawnArea,
    config: AreaSpawnConfig,
    cells: Vec<CellPlan>,
    phase: Phase,
    next_cell: usize,
    open: Option<OpenCell>,
    ledger: ClearLedger,
    streams: Vec<Vec<RandomStream>>,
    label: String,
    summary: AreaSpawnSummary,
}

impl AreaSpawnTask {
    pub fn new(spawners: Vec<Spawner>, area: SpawnArea, config: AreaSpawnConfig) -> Self {
        let cells = plan_cells(&area, config.max_range);
        let summary = AreaSpawnSummary {
            cells_total: cells.len(),
            steps_total: area_spawn_steps(&area, &spawners, config.max_range),
            ..Default::default()
        };
        Self {
            spawners,
            area,
            config,
            cells,
            phase: Phase::Pending,
            next_cell: 0,
            open: None,
            ledger: ClearLedger::new(),
            streams: Vec::new(),
            label: String::new(),
            summary,
        }
    }

    pub fn area(&self) -> &SpawnArea {
        &self.area
    }

    pub fn config(&self) -> &AreaSpawnConfig {
        &self.config
    }

    pub fn cells(&self) -> &[CellPlan] {
        &self.cells
    }

    pub fn spawners(&self) -> &[Spawner] {
        &self.spawners
    }

    /// Spawners with their rule counters; hand them back for a follow-up pass.
    pub fn into_spawners(self) -> Vec<Spawner> {
        self.spawners
    }

    pub fn ledger(&self) -> &ClearLedger {
        &self.ledger
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.summary.steps_completed,
            total: self.summary.steps_total,
            label: self.label.clone(),
        }
    }

    /// Advances the pass to its next suspension point.
    ///
    /// Only invalid configuration is returned as an error. Rule failures and unavailable
    /// cells are logged, reported as events and skipped.
    pub fn step(&mut self, ctx: &mut SpawnContext<'_>) -> Result<Step> {
        match self.phase {
            Phase::Finished => return Ok(Step::Done(self.summary.clone())),
            Phase::Pending => self.start(ctx)?,
            Phase::Running => {}
        }

        if ctx.cancel.is_cancelled() {
            return Ok(self.finish(ctx, true));
        }

        if self.open.is_none() {
            if self.next_cell >= self.cells.len() {
                return Ok(self.finish(ctx, false));
            }
            if !self.open_cell(ctx) {
                return Ok(self.suspend(ctx));
            }
        }

        self.run_next_spawner(ctx);
        Ok(self.suspend(ctx))
    }

    /// Steps until the pass is done.
    pub fn run_to_completion(&mut self, ctx: &mut SpawnContext<'_>) -> Result<AreaSpawnSummary> {
        loop {
            if let Step::Done(summary) = self.step(ctx)? {
                return Ok(summary);
            }
        }
    }

    fn start(&mut self, ctx: &mut SpawnContext<'_>) -> Result<()> {
        self.config.validate()?;
        self.area.validate()?;
        for spawner in &self.spawners {
            spawner.validate()?;
        }

        let pass_seed = ctx.seeds.pass_seed();
        self.summary.pass_seed = pass_seed;
        self.streams = self
            .spawners
            .iter()
            .enumerate()
            .map(|(si, s)| {
                (0..s.rules.len())
                    .map(|ri| RandomStream::for_rule(pass_seed, si, ri))
                    .collect()
            })
            .collect();
        for spawner in &mut self.spawners {
            let mode = spawner.mode;
            for rule in &mut spawner.rules {
                if rule.effective_mode(mode) == SpawnMode::Replace {
                    rule.reset_counters();
                } else {
                    rule.counters.placed_last_pass = 0;
                }
            }
        }
        self.ledger.clear();
        self.phase = Phase::Running;

        info!(
            "Starting area pass over {} cell(s), {} step(s), seed {}.",
            self.cells.len(),
            self.summary.steps_total,
            pass_seed
        );
        let mut silent = ();
        let sink = event_sink(&mut ctx.sink, &mut silent);
        if sink.wants(SpawnEventKind::PassStarted) {
            sink.send(SpawnEvent::PassStarted {
                cells: self.cells.len(),
                total_steps: self.summary.steps_total,
                spawners: self.spawners.len(),
            });
        }
        Ok(())
    }

    /// Creates the next cell's workspace, clears Replace content and collects its channels.
    /// Returns `false` when the cell was skipped.
    fn open_cell(&mut self, ctx: &mut SpawnContext<'_>) -> bool {
        let cell = self.cells[self.next_cell];
        let mut silent = ();

        if self.config.dynamic_loading {
            if let Some(loader) = ctx.loader.as_deref_mut() {
                loader.set_loading_window(cell.square().shrink(LOADING_WINDOW_EPSILON));
            }
        }

        {
            let sink = event_sink(&mut ctx.sink, &mut silent);
            if sink.wants(SpawnEventKind::CellStarted) {
                sink.send(SpawnEvent::CellStarted {
                    index: cell.index,
                    center: cell.center,
                    range: cell.range,
                });
            }
        }

        let mut request = WorkspaceRequest::new(cell.center, cell.range)
            .with_multi_tile(self.config.include_multi_tile);
        request.valid_tile_names = self.config.valid_tile_names.clone();
        let mut workspace = match Workspace::create(&*ctx.store, request, Arc::clone(&ctx.pool)) {
            Ok(ws) => ws,
            Err(err) => {
                self.skip_cell(ctx, cell, &err);
                return false;
            }
        };
        debug!(
            "Opened cell {} at {} with {} tile(s).",
            cell.index,
            cell.center,
            workspace.tile_ids().len()
        );

        let engine = SpawnRuleEngine::new(ctx.evaluator, ctx.registry, ctx.textures);
        let tiles = workspace.tile_ids().to_vec();
        for spawner in self.spawners.iter().filter(|s| s.active) {
            for rule in spawner
                .rules
                .iter()
                .filter(|r| r.active && r.effective_mode(spawner.mode) == SpawnMode::Replace)
            {
                let mut cctx = CommitContext {
                    store: &mut *ctx.store,
                    cache: &mut *ctx.cache,
                    workspace: &mut workspace,
                    extensions: None,
                    sink: event_sink(&mut ctx.sink, &mut silent),
                };
                match engine.clear_for_replace(&mut cctx, &tiles, rule, &mut self.ledger) {
                    Ok(n) => self.summary.items_cleared += n,
                    Err(err) => {
                        error!(
                            "Clearing '{}' of '{}' ({}) failed: {err}",
                            rule.name, spawner.name, rule.resource_type
                        );
                        self.summary.rules_failed += 1;
                        self.label = format!("{}/{} failed: {err}", spawner.name, rule.name);
                        let sink = event_sink(&mut ctx.sink, &mut silent);
                        if sink.wants(SpawnEventKind::RuleFailed) {
                            sink.send(SpawnEvent::RuleFailed {
                                spawner: spawner.name.clone(),
                                rule: rule.name.clone(),
                                resource_type: rule.resource_type,
                                tile: failing_tile(&err),
                                message: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        workspace.collect_all(&*ctx.store, ctx.cache);
        self.open = Some(OpenCell {
            cell,
            workspace,
            next_spawner: 0,
        });
        true
    }

    fn skip_cell(&mut self, ctx: &mut SpawnContext<'_>, cell: CellPlan, err: &Error) {
        match err {
            Error::TileUnavailable { .. } => {
                warn!("Skipping cell {} at {}: {err}.", cell.index, cell.center)
            }
            _ => error!("Skipping cell {} at {}: {err}", cell.index, cell.center),
        }
        let mut silent = ();
        let sink = event_sink(&mut ctx.sink, &mut silent);
        if sink.wants(SpawnEventKind::CellSkipped) {
            sink.send(SpawnEvent::CellSkipped {
                index: cell.index,
                center: cell.center,
                reason: err.to_string(),
            });
        }
        let cell_steps: usize = self.spawners.iter().map(Spawner::step_rule_count).sum();
        self.summary.steps_completed += cell_steps;
        self.summary.cells_skipped += 1;
        self.next_cell += 1;
        self.label = format!("skipped cell {}", cell.index);
    }

    /// Runs every active rule of the open cell's next active spawner, then closes the cell if
    /// no spawner is left.
    fn run_next_spawner(&mut self, ctx: &mut SpawnContext<'_>) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        while open.next_spawner < self.spawners.len() && !self.spawners[open.next_spawner].active
        {
            open.next_spawner += 1;
        }

        if open.next_spawner < self.spawners.len() {
            let si = open.next_spawner;
            open.next_spawner += 1;
            let engine = SpawnRuleEngine::new(ctx.evaluator, ctx.registry, ctx.textures);
            let mut silent = ();
            let spawner = &mut self.spawners[si];
            for ri in 0..spawner.rules.len() {
                if !spawner.rules[ri].active {
                    continue;
                }
                let mut cctx = CommitContext {
                    store: &mut *ctx.store,
                    cache: &mut *ctx.cache,
                    workspace: &mut open.workspace,
                    extensions: ctx
                        .extensions
                        .as_mut()
                        .map(|h| &mut **h as &mut dyn ExtensionHandler),
                    sink: event_sink(&mut ctx.sink, &mut silent),
                };
                let rng = &mut self.streams[si][ri];
                match engine.run_rule(&mut cctx, spawner, ri, rng) {
                    Ok(run) => {
                        self.summary.rules_committed += 1;
                        self.summary.tiles_written += run.outcome.tiles_written;
                        self.summary.instances_placed += run.outcome.instances_placed;
                    }
                    Err(err) => {
                        let rule = &spawner.rules[ri];
                        error!(
                            "Rule '{}' of '{}' ({}) failed in cell {}: {err}",
                            rule.name, spawner.name, rule.resource_type, open.cell.index
                        );
                        self.summary.rules_failed += 1;
                        self.label = format!("{}/{} failed: {err}", spawner.name, rule.name);
                        let sink = event_sink(&mut ctx.sink, &mut silent);
                        if sink.wants(SpawnEventKind::RuleFailed) {
                            sink.send(SpawnEvent::RuleFailed {
                                spawner: spawner.name.clone(),
                                rule: rule.name.clone(),
                                resource_type: rule.resource_type,
                                tile: failing_tile(&err),
                                message: err.to_string(),
                            });
                        }
                    }
                }
            }
            self.summary.steps_completed += spawner.step_rule_count();
            if self.label.is_empty() {
                self.label = format!("{} in cell {}", spawner.name, open.cell.index);
            }
        }

        let more = self.spawners[open.next_spawner.min(self.spawners.len())..]
            .iter()
            .any(|s| s.active);
        if !more {
            self.close_cell(ctx);
        }
    }

    fn close_cell(&mut self, ctx: &mut SpawnContext<'_>) {
        if let Some(open) = self.open.take() {
            debug!("Closing cell {}.", open.cell.index);
            open.workspace.close();
            ctx.cache.flush();
            self.summary.cells_completed += 1;
            self.next_cell += 1;
        }
    }

    /// Reports progress and polls the reporter for cancellation.
    fn suspend(&mut self, ctx: &mut SpawnContext<'_>) -> Step {
        let progress = self.progress();
        let mut silent = ();
        let sink = event_sink(&mut ctx.sink, &mut silent);
        if sink.wants(SpawnEventKind::Progress) {
            sink.send(SpawnEvent::Progress {
                completed: progress.completed,
                total: progress.total,
                label: progress.label.clone(),
            });
        }
        if let Some(reporter) = ctx.reporter.as_deref_mut() {
            if reporter.update(&progress) {
                ctx.cancel.cancel();
            }
        }
        self.label.clear();
        Step::Continue(progress)
    }

    fn finish(&mut self, ctx: &mut SpawnContext<'_>, cancelled: bool) -> Step {
        if cancelled {
            if let Some(open) = self.open.as_ref() {
                debug!("Cancelled inside cell {}.", open.cell.index);
            }
        }
        // An open cell has committed what it ran so far; release it without advancing.
        if let Some(open) = self.open.take() {
            open.workspace.close();
            ctx.cache.flush();
        }
        self.summary.cancelled = cancelled;
        self.phase = Phase::Finished;
        info!(
            "Area pass {} after {}/{} cell(s): {} rule run(s), {} failure(s), {} instance(s).",
            if cancelled { "cancelled" } else { "finished" },
            self.summary.cells_completed,
            self.summary.cells_total,
            self.summary.rules_committed,
            self.summary.rules_failed,
            self.summary.instances_placed
        );
        let mut silent = ();
        let sink = event_sink(&mut ctx.sink, &mut silent);
        if sink.wants(SpawnEventKind::PassFinished) {
            sink.send(SpawnEvent::PassFinished {
                summary: self.summary.clone(),
            });
        }
        Step::Done(self.summary.clone())
    }
}

fn failing_tile(err: &Error) -> Option<TileId> {
    match err {
        Error::MissingResource { tile, .. } | Error::UnknownTile(tile) => Some(*tile),
        _ => None,
    }
}
