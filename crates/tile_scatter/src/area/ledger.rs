use std::collections::HashSet;

use crate::resource::ResourceIdentity;
use crate::tiles::TileId;

/// Pass-wide record of the `(tile, identity)` pairs Replace mode has already cleared.
#[derive(Clone, Debug, Default)]
pub struct ClearLedger {
    cleared: HashSet<(TileId, ResourceIdentity)>,
}

impl ClearLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the pair. Returns `true` the first time only.
    pub fn claim(&mut self, tile: TileId, identity: ResourceIdentity) -> bool {
        self.cleared.insert((tile, identity))
    }

    pub fn is_cleared(&self, tile: TileId, identity: ResourceIdentity) -> bool {
        self.cleared.contains(&(tile, identity))
    }

    pub fn len(&self) -> usize {
        self.cleared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cleared.is_empty()
    }

    pub fn clear(&mut self) {
        self.cleared.clear();
    }
}
