use std::collections::HashSet;
use std::sync::Arc;

use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use tile_scatter::prelude::{EventSink, SpawnEvent, SpawnEventKind};

/// Bevy message carrying a [`SpawnEvent`] and the entity of the request that produced it.
#[derive(Message, Debug, Clone)]
pub struct SpawnMessage {
    pub request_entity: Entity,
    pub event: SpawnEvent,
}

/// Which event kinds are forwarded to the bus. `None` forwards everything.
#[derive(Clone, Debug, Default)]
pub struct SpawnEventFilter(pub Option<Arc<HashSet<SpawnEventKind>>>);

impl SpawnEventFilter {
    pub fn only(kinds: impl IntoIterator<Item = SpawnEventKind>) -> Self {
        Self(Some(Arc::new(kinds.into_iter().collect())))
    }

    #[inline]
    pub fn allows(&self, kind: SpawnEventKind) -> bool {
        self.0.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Bus configuration. Per-cell progress events are dropped by default.
#[derive(Resource, Clone, Debug)]
pub struct SpawnBusConfig {
    pub filter: SpawnEventFilter,
}

impl Default for SpawnBusConfig {
    fn default() -> Self {
        use SpawnEventKind::*;
        Self {
            filter: SpawnEventFilter::only([
                PassStarted,
                CellSkipped,
                TileCleared,
                RuleCommitted,
                RuleFailed,
                Warning,
                PassFinished,
            ]),
        }
    }
}

/// Channel between the spawn sinks and Bevy's message queue.
#[derive(Resource)]
pub struct SpawnBus {
    tx: Sender<SpawnMessage>,
    rx: Receiver<SpawnMessage>,
}

impl Default for SpawnBus {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl SpawnBus {
    pub fn sender(&self) -> &Sender<SpawnMessage> {
        &self.tx
    }

    pub fn receiver(&self) -> &Receiver<SpawnMessage> {
        &self.rx
    }

    /// A sink tagging every event with `request`.
    pub fn sink(&self, request: Entity, filter: SpawnEventFilter) -> ChannelSink {
        ChannelSink {
            request,
            tx: self.tx.clone(),
            filter,
        }
    }
}

/// Event sink forwarding to the [`SpawnBus`].
pub struct ChannelSink {
    pub request: Entity,
    pub tx: Sender<SpawnMessage>,
    pub filter: SpawnEventFilter,
}

impl EventSink for ChannelSink {
    #[inline]
    fn send(&mut self, event: SpawnEvent) {
        let _ = self.tx.send(SpawnMessage {
            request_entity: self.request,
            event,
        });
    }

    #[inline]
    fn wants(&self, kind: SpawnEventKind) -> bool {
        self.filter.allows(kind)
    }
}
