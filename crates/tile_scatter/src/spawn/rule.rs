//! Spawn rules and spawners.
use std::ops::{Deref, DerefMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mask::{Curve, InfluenceScope, MaskStack, TextureChannel};
use crate::resource::{PrototypeRegistry, ResourceIdentity, ResourceType};

/// Whether a rerun keeps or replaces previous content.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpawnMode {
    /// Content accumulates on top of what is there.
    #[default]
    Add,
    /// Content of the same resource is cleared once per tile before the first write of a pass.
    Replace,
}

/// Running counters of a rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuleCounters {
    /// Instances placed by this rule since the counters were last reset.
    pub active_instances: usize,
    /// Instances placed during the most recent pass.
    pub placed_last_pass: usize,
}

/// External texture sampled as an extra fitness factor for point placements.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct AreaMask {
    pub texture_id: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel: TextureChannel,
}

/// One resource distributed by a spawner.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnRule {
    pub name: String,
    pub resource_type: ResourceType,
    /// Prototype index in the host registry; splat or detail layer for Texture and Detail.
    pub resource_index: usize,
    pub active: bool,
    /// Density a pixel or candidate must exceed.
    pub min_fitness: f32,
    pub max_instances: usize,
    pub ignore_max_instances: bool,
    /// Probability in `[0, 1]` of discarding a candidate that passed the fitness test.
    pub failure_rate: f32,
    pub mask: MaskStack,
    /// Scales the density written by Texture and Detail rules.
    pub strength: f32,
    /// Lattice spacing in world units for point placements.
    pub location_increment: f32,
    /// Candidate offset as a fraction of `location_increment`, in `[0, 1]`.
    pub jitter: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub random_rotation: bool,
    /// Only place where no foreign collider or instance is nearby.
    pub require_virgin: bool,
    pub virgin_radius: f32,
    pub area_mask: Option<AreaMask>,
    /// Mode used instead of the spawner's.
    pub mode_override: Option<SpawnMode>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub counters: RuleCounters,
}

impl Default for SpawnRule {
    fn default() -> Self {
        Self::new("rule", ResourceType::Tree, 0)
    }
}

impl SpawnRule {
    pub fn new(name: impl Into<String>, resource_type: ResourceType, resource_index: usize) -> Self {
        let name = name.into();
        Self {
            mask: MaskStack::new(format!("rule:{name}")),
            name,
            resource_type,
            resource_index,
            active: true,
            min_fitness: 0.0,
            max_instances: 10_000,
            ignore_max_instances: false,
            failure_rate: 0.0,
            strength: 1.0,
            location_increment: 4.0,
            jitter: 0.75,
            min_scale: 1.0,
            max_scale: 1.0,
            random_rotation: true,
            require_virgin: false,
            virgin_radius: 0.0,
            area_mask: None,
            mode_override: None,
            counters: RuleCounters::default(),
        }
    }

    pub fn with_mask(mut self, mask: MaskStack) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_min_fitness(mut self, min_fitness: f32) -> Self {
        self.min_fitness = min_fitness;
        self
    }

    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_ignore_max_instances(mut self, ignore: bool) -> Self {
        self.ignore_max_instances = ignore;
        self
    }

    pub fn with_failure_rate(mut self, failure_rate: f32) -> Self {
        self.failure_rate = failure_rate;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_location_increment(mut self, increment: f32) -> Self {
        self.location_increment = increment;
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_scale_range(mut self, min: f32, max: f32) -> Self {
        self.min_scale = min;
        self.max_scale = max;
        self
    }

    pub fn with_random_rotation(mut self, random_rotation: bool) -> Self {
        self.random_rotation = random_rotation;
        self
    }

    pub fn with_virgin_terrain(mut self, radius: f32) -> Self {
        self.require_virgin = true;
        self.virgin_radius = radius;
        self
    }

    pub fn with_area_mask(mut self, texture_id: impl Into<String>, channel: TextureChannel) -> Self {
        self.area_mask = Some(AreaMask {
            texture_id: texture_id.into(),
            channel,
        });
        self
    }

    pub fn with_mode_override(mut self, mode: SpawnMode) -> Self {
        self.mode_override = Some(mode);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// The mode this rule runs in under a spawner defaulting to `spawner_mode`.
    pub fn effective_mode(&self, spawner_mode: SpawnMode) -> SpawnMode {
        self.mode_override.unwrap_or(spawner_mode)
    }

    /// Identity keying Replace clearing: the registered prototype's name, or the rule name when
    /// the registry does not know the resource.
    pub fn identity(&self, registry: &dyn PrototypeRegistry) -> ResourceIdentity {
        match registry.lookup(self.resource_type, self.resource_index) {
            Some(descriptor) => descriptor.identity(),
            None => ResourceIdentity::derive(self.resource_type, &self.name),
        }
    }

    /// Whether the rule counts toward progress steps.
    pub fn counts_as_step(&self) -> bool {
        self.active && self.resource_type != ResourceType::WorldBiomeMask
    }

    /// Forces the mode to `mode` until the returned guard is dropped.
    pub fn override_mode(&mut self, mode: SpawnMode) -> ModeOverride<'_> {
        let previous = self.mode_override.replace(mode);
        ModeOverride {
            rule: self,
            previous,
        }
    }

    pub fn reset_counters(&mut self) {
        self.counters = RuleCounters::default();
    }

    /// Validates the rule, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(format!("rule '{}': {msg}", self.name)));
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("rule name must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return invalid("failure_rate must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return invalid("jitter must be in [0, 1]");
        }
        if !self.min_fitness.is_finite() {
            return invalid("min_fitness must be finite");
        }
        if self.strength < 0.0 || !self.strength.is_finite() {
            return invalid("strength must be >= 0");
        }
        if self.resource_type.is_instanced() {
            if self.location_increment.is_nan() || self.location_increment <= 0.0 {
                return invalid("location_increment must be > 0");
            }
            if self.min_scale <= 0.0 || self.max_scale < self.min_scale {
                return invalid("scale range must satisfy 0 < min_scale <= max_scale");
            }
            if self.virgin_radius < 0.0 {
                return invalid("virgin_radius must be >= 0");
            }
        }
        self.mask.validate()
    }
}

/// Restores a rule's mode override when dropped.
#[derive(Debug)]
pub struct ModeOverride<'r> {
    rule: &'r mut SpawnRule,
    previous: Option<SpawnMode>,
}

impl Deref for ModeOverride<'_> {
    type Target = SpawnRule;

    fn deref(&self) -> &SpawnRule {
        self.rule
    }
}

impl DerefMut for ModeOverride<'_> {
    fn deref_mut(&mut self) -> &mut SpawnRule {
        self.rule
    }
}

impl Drop for ModeOverride<'_> {
    fn drop(&mut self) {
        self.rule.mode_override = self.previous;
    }
}

/// A named, ordered list of rules sharing a mask stack and defaults.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq)]
pub struct Spawner {
    pub name: String,
    pub active: bool,
    pub rules: Vec<SpawnRule>,
    pub mask: MaskStack,
    /// Evaluated above the spawner's stack, e.g. a biome restriction.
    pub biome: Option<MaskStack>,
    pub mode: SpawnMode,
    /// Attenuation of point placements by `distance / range` from the cell center.
    pub distance_curve: Curve,
    /// Applied to the combined rule field.
    pub strength_curve: Curve,
    pub scope: InfluenceScope,
}

impl Default for Spawner {
    fn default() -> Self {
        Self::new("spawner")
    }
}

impl Spawner {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            mask: MaskStack::new(format!("spawner:{name}")),
            name,
            active: true,
            rules: Vec::new(),
            biome: None,
            mode: SpawnMode::Add,
            distance_curve: Curve::constant(1.0),
            strength_curve: Curve::linear(),
            scope: InfluenceScope::Global,
        }
    }

    pub fn with_rule(mut self, rule: SpawnRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_mask(mut self, mask: MaskStack) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_biome(mut self, biome: MaskStack) -> Self {
        self.biome = Some(biome);
        self
    }

    pub fn with_mode(mut self, mode: SpawnMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_distance_curve(mut self, curve: Curve) -> Self {
        self.distance_curve = curve;
        self
    }

    pub fn with_strength_curve(mut self, curve: Curve) -> Self {
        self.strength_curve = curve;
        self
    }

    pub fn with_scope(mut self, scope: InfluenceScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Rules contributing progress steps.
    pub fn step_rule_count(&self) -> usize {
        if !self.active {
            return 0;
        }
        self.rules.iter().filter(|r| r.counts_as_step()).count()
    }

    /// Whether any active rule runs in Replace mode.
    pub fn has_replace_rules(&self) -> bool {
        self.active
            && self
                .rules
                .iter()
                .any(|r| r.active && r.effective_mode(self.mode) == SpawnMode::Replace)
    }

    /// Validates the spawner and all of its rules.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("spawner name must not be empty".into()));
        }
        self.mask.validate()?;
        if let Some(biome) = &self.biome {
            biome.validate()?;
        }
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate()?;
            if self.rules[..i].iter().any(|r| r.name == rule.name) {
                return Err(Error::InvalidConfig(format!(
                    "spawner '{}' has duplicate rule '{}'",
                    self.name, rule.name
                )));
            }
        }
        Ok(())
    }
}
