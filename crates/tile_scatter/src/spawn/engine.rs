//! Two-phase rule execution over an open workspace.
use tracing::debug;

use super::commit::{
    commit_biome_mask, commit_detail, commit_instances, commit_texture, CommitContext,
    CommitOutcome, CommitSettings,
};
use super::events::{SpawnEvent, SpawnEventKind};
use super::random::RandomStream;
use super::rule::{SpawnMode, SpawnRule, Spawner};
use super::simulate::{simulate, AffectedSet, ParallelEvaluate};
use crate::area::ClearLedger;
use crate::error::{Error, Result};
use crate::mask::{evaluate_hierarchy, MaskHierarchy, TextureRegistry};
use crate::raster::{PooledRaster, Raster};
use crate::resource::{PrototypeRegistry, ResourceType};
use crate::tiles::{ChannelKind, TileId};
use crate::workspace::Workspace;

/// Result of [`SpawnRuleEngine::run_rule`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleRun {
    pub affected: AffectedSet,
    pub outcome: CommitOutcome,
}

/// Evaluates, simulates and commits spawn rules.
#[derive(Clone, Copy)]
pub struct SpawnRuleEngine<'a> {
    evaluator: &'a dyn ParallelEvaluate,
    registry: &'a dyn PrototypeRegistry,
    textures: &'a TextureRegistry,
}

impl<'a> SpawnRuleEngine<'a> {
    pub fn new(
        evaluator: &'a dyn ParallelEvaluate,
        registry: &'a dyn PrototypeRegistry,
        textures: &'a TextureRegistry,
    ) -> Self {
        Self {
            evaluator,
            registry,
            textures,
        }
    }

    pub fn registry(&self) -> &'a dyn PrototypeRegistry {
        self.registry
    }

    pub fn textures(&self) -> &'a TextureRegistry {
        self.textures
    }

    /// Combined biome, spawner and rule field of rule `rule_index` on its canvas.
    pub fn evaluate_rule_field(
        &self,
        ctx: &mut CommitContext<'_>,
        spawner: &mut Spawner,
        rule_index: usize,
    ) -> Result<PooledRaster> {
        let Spawner {
            name,
            rules,
            mask,
            biome,
            strength_curve,
            scope,
            ..
        } = spawner;
        let rule = rules.get_mut(rule_index).ok_or_else(|| {
            Error::InvalidConfig(format!("spawner '{name}' has no rule {rule_index}"))
        })?;
        let grid = ctx
            .workspace
            .layout(rule.resource_type.channel_class())
            .grid
            .clone();
        let mut mask_ctx =
            ctx.workspace
                .mask_context(&*ctx.store, &mut *ctx.cache, self.textures, *scope);
        evaluate_hierarchy(
            MaskHierarchy {
                biome: biome.as_mut(),
                spawner: mask,
                rule: &mut rule.mask,
                strength: strength_curve,
            },
            &grid,
            &mut mask_ctx,
            &mut *ctx.sink,
        )
    }

    /// Flags the workspace tiles the rule would write.
    pub fn simulate(
        &self,
        workspace: &Workspace,
        field: &Raster,
        rule: &SpawnRule,
    ) -> Result<AffectedSet> {
        simulate(self.evaluator, workspace, field, rule)
    }

    /// Writes `field` into the affected tiles according to the rule's resource type.
    pub fn commit(
        &self,
        ctx: &mut CommitContext<'_>,
        settings: CommitSettings<'_>,
        rule: &mut SpawnRule,
        field: &Raster,
        affected: &AffectedSet,
        rng: &mut RandomStream,
    ) -> Result<CommitOutcome> {
        match rule.resource_type {
            ResourceType::Texture => commit_texture(ctx, self.registry, rule, field, affected),
            ResourceType::Detail => {
                if rule.effective_mode(settings.spawner_mode) == SpawnMode::Replace {
                    // Clearing already happened once per tile; every write of the pass adds.
                    let guard = rule.override_mode(SpawnMode::Add);
                    commit_detail(ctx, self.registry, settings, &guard, field, affected)
                } else {
                    commit_detail(ctx, self.registry, settings, rule, field, affected)
                }
            }
            ResourceType::WorldBiomeMask => commit_biome_mask(ctx, rule, field, affected),
            _ => commit_instances(
                ctx,
                self.registry,
                self.textures,
                settings,
                rule,
                field,
                affected,
                rng,
            ),
        }
    }

    /// Evaluates, simulates and commits rule `rule_index` of `spawner`.
    ///
    /// Nothing is written when simulate flags no tile.
    pub fn run_rule(
        &self,
        ctx: &mut CommitContext<'_>,
        spawner: &mut Spawner,
        rule_index: usize,
        rng: &mut RandomStream,
    ) -> Result<RuleRun> {
        let field = self.evaluate_rule_field(ctx, spawner, rule_index)?;
        let settings = CommitSettings {
            spawner_mode: spawner.mode,
            distance_curve: &spawner.distance_curve,
        };
        let Some(rule) = spawner.rules.get_mut(rule_index) else {
            return Err(Error::InvalidConfig(format!(
                "spawner '{}' has no rule {rule_index}",
                spawner.name
            )));
        };

        let affected = self.simulate(&*ctx.workspace, &field, rule)?;
        if ctx.sink.wants(SpawnEventKind::RuleSimulated) {
            ctx.sink.send(SpawnEvent::RuleSimulated {
                spawner: spawner.name.clone(),
                rule: rule.name.clone(),
                affected_tiles: affected.affected_count(),
                total_tiles: affected.len(),
            });
        }
        if !affected.any() {
            return Ok(RuleRun {
                affected,
                outcome: CommitOutcome::default(),
            });
        }

        let outcome = self.commit(ctx, settings, rule, &field, &affected, rng)?;
        debug!(
            "Rule '{}' of '{}' wrote {} tile(s), placed {} instance(s).",
            rule.name, spawner.name, outcome.tiles_written, outcome.instances_placed
        );
        if ctx.sink.wants(SpawnEventKind::RuleCommitted) {
            ctx.sink.send(SpawnEvent::RuleCommitted {
                spawner: spawner.name.clone(),
                rule: rule.name.clone(),
                tiles_written: outcome.tiles_written,
                instances_placed: outcome.instances_placed,
            });
        }
        Ok(RuleRun { affected, outcome })
    }

    /// Both phases for one rule; returns the simulate result.
    pub fn simulate_and_commit(
        &self,
        ctx: &mut CommitContext<'_>,
        spawner: &mut Spawner,
        rule_index: usize,
        rng: &mut RandomStream,
    ) -> Result<AffectedSet> {
        self.run_rule(ctx, spawner, rule_index, rng)
            .map(|run| run.affected)
    }

    /// Clears the rule's previous content from `tiles` that `ledger` has not seen yet this pass.
    ///
    /// Instanced rules remove the instances carrying the rule's identity; Detail rules zero
    /// their layer. Returns the number of removed instances or cleared pixels.
    pub fn clear_for_replace(
        &self,
        ctx: &mut CommitContext<'_>,
        tiles: &[TileId],
        rule: &SpawnRule,
        ledger: &mut ClearLedger,
    ) -> Result<usize> {
        if !rule.resource_type.clears_on_replace() {
            return Ok(0);
        }
        let identity = rule.identity(self.registry);
        let kind = rule.resource_type.instance_kind();
        let mut total = 0;
        for &tile in tiles {
            if !ledger.claim(tile, identity) {
                continue;
            }
            let t = ctx.store.tile_mut(tile).ok_or(Error::UnknownTile(tile))?;
            let removed = match kind {
                Some(kind) => {
                    let n = t.remove_instances(kind, identity);
                    ctx.cache.mark_instances_dirty(tile, kind);
                    n
                }
                None => {
                    let channel = ChannelKind::Detail(rule.resource_index);
                    let n = t
                        .read_channel(&channel)
                        .map_or(0, |r| r.data.iter().filter(|v| **v != 0.0).count());
                    if n > 0 {
                        t.fill_channel(&channel, 0.0)?;
                        ctx.cache.mark_raster_dirty(tile, &channel);
                    }
                    n
                }
            };
            debug!(
                "Cleared {removed} {} item(s) of rule '{}' from tile {tile}.",
                rule.resource_type, rule.name
            );
            if ctx.sink.wants(SpawnEventKind::TileCleared) {
                ctx.sink.send(SpawnEvent::TileCleared {
                    tile,
                    resource_type: rule.resource_type,
                    identity,
                    removed,
                });
            }
            total += removed;
        }
        if kind.is_some() && total > 0 {
            ctx.cache.invalidate_collision_masks();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec2;

    use super::*;
    use crate::cache::DataCache;
    use crate::mask::{MaskNode, MaskStack};
    use crate::raster::BufferPool;
    use crate::resource::{
        InstanceKind, PlacedInstance, PrototypeCatalog, PrototypeDescriptor, ResourceIdentity,
    };
    use crate::spawn::events::VecSink;
    use crate::spawn::simulate::SerialEvaluator;
    use crate::tiles::{MemoryTileStore, Tile, TileStore};
    use crate::workspace::WorkspaceRequest;

    fn store() -> MemoryTileStore {
        MemoryTileStore::grid(Vec2::ZERO, 16.0, 1, 1, 16, |_| 0.0)
    }

    fn catalog() -> PrototypeCatalog {
        PrototypeCatalog::new()
            .with(PrototypeDescriptor::new(ResourceType::Texture, 0, "grass", 0.0))
            .with(PrototypeDescriptor::new(ResourceType::Texture, 1, "rock", 0.0))
            .with(PrototypeDescriptor::new(ResourceType::Detail, 0, "tufts", 0.0))
            .with(PrototypeDescriptor::new(ResourceType::Tree, 0, "oak", 0.5))
    }

    fn open(store: &MemoryTileStore, cache: &mut DataCache) -> Workspace {
        let mut ws = Workspace::create(
            store,
            WorkspaceRequest::new(Vec2::splat(8.0), 8.0),
            Arc::new(BufferPool::new()),
        )
        .expect("workspace");
        ws.collect_all(store, cache);
        ws
    }

    fn constant_rule(name: &str, resource_type: ResourceType, index: usize, v: f32) -> SpawnRule {
        SpawnRule::new(name, resource_type, index)
            .with_mask(MaskStack::new(name).with_node(MaskNode::constant(v)))
    }

    #[test]
    fn texture_rule_registers_missing_layer_and_blends() {
        let mut store = store();
        let mut cache = DataCache::new();
        let mut ws = open(&store, &mut cache);
        let registry = catalog();
        let textures = TextureRegistry::new();
        let engine = SpawnRuleEngine::new(&SerialEvaluator, &registry, &textures);
        let mut spawner =
            Spawner::new("ground").with_rule(constant_rule("rock", ResourceType::Texture, 1, 0.8));
        let mut sink = VecSink::new();

        let run = {
            let mut ctx = CommitContext {
                store: &mut store,
                cache: &mut cache,
                workspace: &mut ws,
                extensions: None,
                sink: &mut sink,
            };
            engine
                .run_rule(&mut ctx, &mut spawner, 0, &mut RandomStream::new(1))
                .expect("run")
        };
        assert_eq!(run.outcome.tiles_written, 1);
        assert_eq!(run.outcome.registrations, 1);

        let tile = store.tile(TileId(0)).expect("tile");
        let rock = tile.read_channel(&ChannelKind::Splat(1)).expect("rock");
        let grass = tile.read_channel(&ChannelKind::Splat(0)).expect("grass");
        assert!(rock.data.iter().all(|v| (v - 0.8).abs() < 1e-5));
        assert!(grass.data.iter().all(|v| (v - 0.2).abs() < 1e-5));
        assert_eq!(sink.count(SpawnEventKind::RuleSimulated), 1);
        assert_eq!(sink.count(SpawnEventKind::RuleCommitted), 1);
    }

    #[test]
    fn replace_detail_writes_add_and_restores_mode() {
        let mut store = store();
        let mut cache = DataCache::new();
        let mut ws = open(&store, &mut cache);
        let registry = catalog();
        let textures = TextureRegistry::new();
        let engine = SpawnRuleEngine::new(&SerialEvaluator, &registry, &textures);
        let mut spawner = Spawner::new("meadow")
            .with_mode(SpawnMode::Replace)
            .with_rule(constant_rule("tufts", ResourceType::Detail, 0, 0.5));

        let mut ctx = CommitContext {
            store: &mut store,
            cache: &mut cache,
            workspace: &mut ws,
            extensions: None,
            sink: &mut (),
        };
        let mut rng = RandomStream::new(3);
        engine.run_rule(&mut ctx, &mut spawner, 0, &mut rng).expect("first");
        engine.run_rule(&mut ctx, &mut spawner, 0, &mut rng).expect("second");
        drop(ctx);

        assert_eq!(spawner.rules[0].mode_override, None);
        let tile = store.tile(TileId(0)).expect("tile");
        let density = tile.read_channel(&ChannelKind::Detail(0)).expect("layer");
        assert!(density.data.iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn unaffected_rule_writes_nothing() {
        let mut store = store();
        let mut cache = DataCache::new();
        let mut ws = open(&store, &mut cache);
        let registry = catalog();
        let textures = TextureRegistry::new();
        let engine = SpawnRuleEngine::new(&SerialEvaluator, &registry, &textures);
        let mut spawner = Spawner::new("forest").with_rule(
            constant_rule("oaks", ResourceType::Tree, 0, 0.4).with_min_fitness(0.4),
        );
        let run = {
            let mut ctx = CommitContext {
                store: &mut store,
                cache: &mut cache,
                workspace: &mut ws,
                extensions: None,
                sink: &mut (),
            };
            engine
                .run_rule(&mut ctx, &mut spawner, 0, &mut RandomStream::new(1))
                .expect("run")
        };
        assert!(!run.affected.any());
        assert_eq!(run.outcome, CommitOutcome::default());
        assert_eq!(store.total_writes(), 0);
    }

    #[test]
    fn tree_rule_places_on_lattice() {
        let mut store = store();
        let mut cache = DataCache::new();
        let mut ws = open(&store, &mut cache);
        let registry = catalog();
        let textures = TextureRegistry::new();
        let engine = SpawnRuleEngine::new(&SerialEvaluator, &registry, &textures);
        let mut spawner = Spawner::new("forest")
            .with_rule(constant_rule("oaks", ResourceType::Tree, 0, 1.0).with_jitter(0.0));
        let run = {
            let mut ctx = CommitContext {
                store: &mut store,
                cache: &mut cache,
                workspace: &mut ws,
                extensions: None,
                sink: &mut (),
            };
            engine
                .run_rule(&mut ctx, &mut spawner, 0, &mut RandomStream::new(1))
                .expect("run")
        };
        assert_eq!(run.outcome.candidates, 16);
        assert_eq!(run.outcome.instances_placed, 16);
        let tile = store.tile(TileId(0)).expect("tile");
        let trees = tile.instances(InstanceKind::Tree);
        assert_eq!(trees.len(), 16);
        assert!(trees.iter().all(|t| t.tag == "oak" && (t.radius - 0.5).abs() < 1e-5));
        assert_eq!(ws.trees().len(), 16);
    }

    #[test]
    fn replace_clearing_claims_each_tile_once() {
        let identity = ResourceIdentity::derive(ResourceType::Tree, "oak");
        let old = PlacedInstance {
            identity,
            resource_type: ResourceType::Tree,
            index: 0,
            tag: "oak".into(),
            position: glam::Vec3::new(2.0, 0.0, 2.0),
            rotation_degrees: 0.0,
            scale: 1.0,
            radius: 0.5,
        };
        let mut store = store();
        store.for_each_tile_mut(|t| {
            t.register(&PrototypeDescriptor::new(ResourceType::Tree, 0, "oak", 0.5));
            t.add_instances(InstanceKind::Tree, vec![old.clone(), old.clone()])
                .expect("seed instances");
        });
        let mut cache = DataCache::new();
        let mut ws = open(&store, &mut cache);
        let registry = catalog();
        let textures = TextureRegistry::new();
        let engine = SpawnRuleEngine::new(&SerialEvaluator, &registry, &textures);
        let rule = SpawnRule::new("oaks", ResourceType::Tree, 0);
        let mut ledger = ClearLedger::new();
        let mut sink = VecSink::new();
        let tiles = ws.tile_ids().to_vec();

        let mut ctx = CommitContext {
            store: &mut store,
            cache: &mut cache,
            workspace: &mut ws,
            extensions: None,
            sink: &mut sink,
        };
        let first = engine
            .clear_for_replace(&mut ctx, &tiles, &rule, &mut ledger)
            .expect("first");
        let second = engine
            .clear_for_replace(&mut ctx, &tiles, &rule, &mut ledger)
            .expect("second");
        drop(ctx);

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(sink.count(SpawnEventKind::TileCleared), 1);
        let tile = store.tile(TileId(0)).expect("tile");
        assert!(tile.instances(InstanceKind::Tree).is_empty());
    }
}
