//! Canvas layouts: how tile pixels map onto a workspace canvas.
use crate::raster::{CanvasGrid, ChannelClass, PixelRect, WorldRect};
use crate::tiles::{Tile, TileId, TileStore};

/// The part of one tile that lands on a canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRegion {
    pub tile: TileId,
    /// Pixels of the canvas covered by the tile.
    pub canvas_rect: PixelRect,
    /// The same pixels in the tile's own channel raster.
    pub tile_rect: PixelRect,
    /// The tile's lattice for this channel class.
    pub tile_grid: CanvasGrid,
}

/// Canvas of one channel class and the tile regions composing it.
#[derive(Clone, Debug)]
pub struct CanvasLayout {
    pub class: ChannelClass,
    pub grid: CanvasGrid,
    pub regions: Vec<TileRegion>,
}

impl CanvasLayout {
    /// Lays out a canvas over `square`, snapped to the lattice of `anchor`.
    ///
    /// Tiles whose overlap with the square contains no pixel center get no region. When a tile's
    /// lattice differs from the anchor's, the shorter of the two spans is used.
    pub fn build(
        class: ChannelClass,
        store: &dyn TileStore,
        anchor: &dyn Tile,
        square: WorldRect,
        tiles: &[TileId],
    ) -> Self {
        let lattice = anchor.grid(class);
        let grid = CanvasGrid::snapped(lattice.origin, lattice.cell_size, square);
        let canvas_bounds = grid.world_rect();

        let mut regions = Vec::with_capacity(tiles.len());
        for &id in tiles {
            let Some(tile) = store.tile(id) else {
                continue;
            };
            let Some(overlap) = tile
                .bounds()
                .intersection(&square)
                .and_then(|o| o.intersection(&canvas_bounds))
            else {
                continue;
            };
            let tile_grid = tile.grid(class);
            let canvas_rect = grid.pixel_span(&overlap);
            let tile_rect = tile_grid.pixel_span(&overlap);
            let width = canvas_rect.width.min(tile_rect.width);
            let height = canvas_rect.height.min(tile_rect.height);
            if width == 0 || height == 0 {
                continue;
            }
            regions.push(TileRegion {
                tile: id,
                canvas_rect: PixelRect::new(canvas_rect.x, canvas_rect.y, width, height),
                tile_rect: PixelRect::new(tile_rect.x, tile_rect.y, width, height),
                tile_grid,
            });
        }

        Self {
            class,
            grid,
            regions,
        }
    }

    pub fn region(&self, tile: TileId) -> Option<&TileRegion> {
        self.regions.iter().find(|r| r.tile == tile)
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.regions.iter().map(|r| r.tile)
    }

    /// Canvas pixels that no tile covers.
    pub fn uncovered_pixels(&self) -> usize {
        self.grid.len() - self.regions.iter().map(|r| r.canvas_rect.area()).sum::<usize>()
    }
}
