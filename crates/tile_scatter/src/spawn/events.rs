//! Event types and sinks for observing spawn passes.
//!
//! [`SpawnEvent`]s are emitted by [`crate::area::AreaSpawnTask`], the
//! [`crate::spawn::SpawnRuleEngine`] and mask stack evaluation. Sinks may declare interest
//! per [`SpawnEventKind`] through [`EventSink::wants`] so emitters can skip building events
//! nobody listens to.
use glam::Vec2;

use crate::area::AreaSpawnSummary;
use crate::resource::{ResourceIdentity, ResourceType};
use crate::tiles::TileId;

/// Describes events emitted during a spawn pass.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum SpawnEvent {
    /// Emitted once before the first cell.
    PassStarted {
        /// Number of cells the area was split into.
        cells: usize,
        /// Planned progress steps, see [`crate::area::area_spawn_steps`].
        total_steps: usize,
        spawners: usize,
    },

    /// Emitted when a cell's workspace is about to be created.
    CellStarted {
        index: usize,
        center: Vec2,
        range: f32,
    },

    /// Emitted when a cell is skipped, e.g. because no tile is loaded there.
    CellSkipped {
        index: usize,
        center: Vec2,
        reason: String,
    },

    /// Emitted when Replace mode cleared previous content from a tile.
    TileCleared {
        tile: TileId,
        resource_type: ResourceType,
        identity: ResourceIdentity,
        /// Removed instances, or cleared pixels for detail layers.
        removed: usize,
    },

    /// Emitted after the simulate phase of a rule.
    RuleSimulated {
        spawner: String,
        rule: String,
        affected_tiles: usize,
        total_tiles: usize,
    },

    /// Emitted after the commit phase of a rule.
    RuleCommitted {
        spawner: String,
        rule: String,
        tiles_written: usize,
        instances_placed: usize,
    },

    /// A rule failed; remaining rules continue.
    RuleFailed {
        spawner: String,
        rule: String,
        resource_type: ResourceType,
        tile: Option<TileId>,
        message: String,
    },

    /// Progress of the pass, emitted at every suspension point.
    Progress {
        completed: usize,
        total: usize,
        label: String,
    },

    /// Non-fatal warning.
    Warning {
        /// Context string (e.g. stack or rule name).
        context: String,
        /// Human-readable message.
        message: String,
    },

    /// Emitted once when the pass ends, also after cancellation.
    PassFinished { summary: AreaSpawnSummary },
}

/// Discriminant of [`SpawnEvent`], used for sink filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnEventKind {
    PassStarted,
    CellStarted,
    CellSkipped,
    TileCleared,
    RuleSimulated,
    RuleCommitted,
    RuleFailed,
    Progress,
    Warning,
    PassFinished,
}

impl SpawnEvent {
    pub fn kind(&self) -> SpawnEventKind {
        match self {
            SpawnEvent::PassStarted { .. } => SpawnEventKind::PassStarted,
            SpawnEvent::CellStarted { .. } => SpawnEventKind::CellStarted,
            SpawnEvent::CellSkipped { .. } => SpawnEventKind::CellSkipped,
            SpawnEvent::TileCleared { .. } => SpawnEventKind::TileCleared,
            SpawnEvent::RuleSimulated { .. } => SpawnEventKind::RuleSimulated,
            SpawnEvent::RuleCommitted { .. } => SpawnEventKind::RuleCommitted,
            SpawnEvent::RuleFailed { .. } => SpawnEventKind::RuleFailed,
            SpawnEvent::Progress { .. } => SpawnEventKind::Progress,
            SpawnEvent::Warning { .. } => SpawnEventKind::Warning,
            SpawnEvent::PassFinished { .. } => SpawnEventKind::PassFinished,
        }
    }
}

/// A generic event sink that accepts [`SpawnEvent`]s.
pub trait EventSink {
    fn send(&mut self, event: SpawnEvent);

    /// Whether events of `kind` should be built and sent at all.
    #[inline]
    fn wants(&self, _kind: SpawnEventKind) -> bool {
        true
    }

    fn send_many<I>(&mut self, events: I)
    where
        Self: Sized,
        I: IntoIterator<Item = SpawnEvent>,
    {
        for e in events {
            self.send(e);
        }
    }
}

/// A no-op event sink.
impl EventSink for () {
    #[inline]
    fn send(&mut self, _event: SpawnEvent) {}

    #[inline]
    fn wants(&self, _kind: SpawnEventKind) -> bool {
        false
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    #[inline]
    fn send(&mut self, event: SpawnEvent) {
        (**self).send(event);
    }

    #[inline]
    fn wants(&self, kind: SpawnEventKind) -> bool {
        (**self).wants(kind)
    }
}

/// An event sink that forwards to a user-provided closure.
pub struct FnSink<F>
where
    F: FnMut(SpawnEvent),
{
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(SpawnEvent),
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventSink for FnSink<F>
where
    F: FnMut(SpawnEvent),
{
    #[inline]
    fn send(&mut self, event: SpawnEvent) {
        (self.f)(event);
    }
}

/// An event sink that collects events in a `Vec`, optionally only some kinds.
#[derive(Default)]
pub struct VecSink {
    events: Vec<SpawnEvent>,
    only: Option<Vec<SpawnEventKind>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            only: None,
        }
    }

    /// Collects only events of the given kinds.
    pub fn filtered(kinds: impl IntoIterator<Item = SpawnEventKind>) -> Self {
        Self {
            events: Vec::new(),
            only: Some(kinds.into_iter().collect()),
        }
    }

    pub fn into_inner(self) -> Vec<SpawnEvent> {
        self.events
    }

    pub fn as_slice(&self) -> &[SpawnEvent] {
        &self.events
    }

    /// Number of collected events of `kind`.
    pub fn count(&self, kind: SpawnEventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for VecSink {
    #[inline]
    fn send(&mut self, event: SpawnEvent) {
        if self.wants(event.kind()) {
            self.events.push(event);
        }
    }

    fn wants(&self, kind: SpawnEventKind) -> bool {
        self.only.as_ref().is_none_or(|only| only.contains(&kind))
    }
}

/// Fan-out sink that forwards each event to all contained sinks.
pub struct MultiSink<S: EventSink> {
    pub(crate) sinks: Vec<S>,
}

impl<S: EventSink> MultiSink<S> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sinks(sinks: Vec<S>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: S) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl<S: EventSink> Default for MultiSink<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EventSink> EventSink for MultiSink<S> {
    fn send(&mut self, event: SpawnEvent) {
        let kind = event.kind();
        let targets: Vec<usize> = (0..self.sinks.len())
            .filter(|i| self.sinks[*i].wants(kind))
            .collect();
        let Some((&last, rest)) = targets.split_last() else {
            return;
        };
        for &i in rest {
            self.sinks[i].send(event.clone());
        }
        self.sinks[last].send(event);
    }

    fn wants(&self, kind: SpawnEventKind) -> bool {
        self.sinks.iter().any(|s| s.wants(kind))
    }
}
