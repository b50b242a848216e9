use std::collections::VecDeque;
use std::fmt;

use model::PixelRect;
use serde::{Deserialize, Serialize};

mod generator;
mod hilbert;
mod lifecycle;
mod order;

pub use generator::{ImageSlice, TilingParams};
pub use hilbert::hilbert_index_to_pos;
pub use lifecycle::{CENTER_NEIGHBOR, DenoisePass, NEIGHBOR_COUNT, TileTransition};
pub use order::{ParseTileOrderError, TileOrder};

/// Lifecycle of a tile within one pass. Variants are ordered, so `state >= TileState::Rendered`
/// reads as "at least rendered".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    Render,
    Rendered,
    Denoise,
    Denoised,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub index: usize,
    pub rect: PixelRect,
    pub device: usize,
    pub slice: usize,
    pub state: TileState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(edge: u32) -> Self {
        Self::new(edge, edge)
    }
}

impl Default for TileSize {
    fn default() -> Self {
        Self::square(64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingError {
    ZeroTileSize,
    NoDevices,
    HilbertSpiralSliced,
    HilbertSpiralOverlap,
}

impl fmt::Display for TilingError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroTileSize => write!(formatter, "tile width and height must be non-zero"),
            Self::NoDevices => write!(formatter, "tiling needs at least one device"),
            Self::HilbertSpiralSliced => {
                write!(formatter, "hilbert spiral order cannot be combined with sliced tiling")
            }
            Self::HilbertSpiralOverlap => {
                write!(formatter, "hilbert spiral order cannot be combined with slice overlap")
            }
        }
    }
}

impl std::error::Error for TilingError {}

/// Partition of one resolution pass into tiles, plus the per-device work queues.
///
/// Tiles are stored row-major over the tile grid, so `tiles()[i].index == i` and the grid
/// position of a tile follows from `tile_stride`.
#[derive(Debug, Clone, Default)]
pub struct Tiling {
    image_width: u32,
    image_height: u32,
    tiles: Vec<Tile>,
    tile_stride: usize,
    tile_rows: usize,
    slices: Vec<ImageSlice>,
    generated_order: Vec<Vec<usize>>,
    render_queues: Vec<VecDeque<usize>>,
    denoise_queues: Vec<VecDeque<usize>>,
}

impl Tiling {
    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, index: usize) -> &Tile {
        let Some(tile) = self.tiles.get(index) else {
            panic!(
                "tile index {index} outside tiling of {} tiles",
                self.tiles.len()
            );
        };
        tile
    }

    pub fn tile_stride(&self) -> usize {
        self.tile_stride
    }

    pub fn tile_rows(&self) -> usize {
        self.tile_rows
    }

    pub fn slices(&self) -> &[ImageSlice] {
        &self.slices
    }

    pub fn queue_count(&self) -> usize {
        self.render_queues.len()
    }

    /// Per-device tile order as produced by the generator.
    pub fn generated_order(&self) -> &[Vec<usize>] {
        &self.generated_order
    }

    pub fn pending_render(&self) -> usize {
        self.render_queues.iter().map(VecDeque::len).sum()
    }

    pub fn pending_denoise(&self) -> usize {
        self.denoise_queues.iter().map(VecDeque::len).sum()
    }

    /// Pops the next render tile. With `preserve_device` only the device's own queue is
    /// consulted, otherwise the first non-empty queue wins.
    pub fn pop_render(&mut self, device: usize, preserve_device: bool) -> Option<usize> {
        pop_queue(&mut self.render_queues, device, preserve_device)
    }

    pub fn pop_denoise(&mut self, device: usize, preserve_device: bool) -> Option<usize> {
        pop_queue(&mut self.denoise_queues, device, preserve_device)
    }

    /// Puts every tile back into `Render` and refills the render queues in generated order.
    pub fn requeue_for_render(&mut self) {
        for tile in &mut self.tiles {
            tile.state = TileState::Render;
        }
        for queue in &mut self.denoise_queues {
            queue.clear();
        }
        for (queue, order) in self.render_queues.iter_mut().zip(&self.generated_order) {
            queue.clear();
            queue.extend(order.iter().copied());
        }
    }

    pub fn has_unfinished(&self) -> bool {
        self.tiles.iter().any(|tile| tile.state != TileState::Done)
    }

    pub fn covered_area(&self) -> u64 {
        self.tiles.iter().map(|tile| tile.rect.area()).sum()
    }
}

fn pop_queue(
    queues: &mut [VecDeque<usize>],
    device: usize,
    preserve_device: bool,
) -> Option<usize> {
    if preserve_device {
        return queues.get_mut(device).and_then(VecDeque::pop_front);
    }
    queues.iter_mut().find_map(VecDeque::pop_front)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(width: u32, height: u32) -> TilingParams {
        TilingParams {
            image_width: width,
            image_height: height,
            tile_size: TileSize::square(16),
            order: TileOrder::BottomToTop,
            num_devices: 2,
            preserve_device: false,
            sliced: false,
            slice_overlap: 0,
        }
    }

    #[test]
    fn state_order_follows_lifecycle() {
        assert!(TileState::Render < TileState::Rendered);
        assert!(TileState::Rendered < TileState::Denoise);
        assert!(TileState::Denoise < TileState::Denoised);
        assert!(TileState::Denoised < TileState::Done);
    }

    #[test]
    fn pop_without_affinity_scans_past_empty_queues() {
        let mut tiling = Tiling::generate(&TilingParams {
            preserve_device: true,
            ..params(32, 32)
        })
        .expect("valid tiling");
        assert_eq!(tiling.queue_count(), 2);

        let drained = tiling.render_queues[0].drain(..).collect::<Vec<_>>();
        assert_eq!(drained.len(), 2);

        let first_of_second = tiling.generated_order()[1][0];
        assert_eq!(tiling.pop_render(0, false), Some(first_of_second));
    }

    #[test]
    fn pop_with_affinity_stays_on_own_queue() {
        let mut tiling = Tiling::generate(&TilingParams {
            preserve_device: true,
            ..params(32, 32)
        })
        .expect("valid tiling");
        tiling.render_queues[0].clear();

        assert_eq!(tiling.pop_render(0, true), None);
        assert!(tiling.pop_render(1, true).is_some());
        assert_eq!(tiling.pop_render(7, true), None);
    }

    #[test]
    fn empty_tiling_pops_nothing() {
        let mut tiling = Tiling::default();
        assert!(tiling.is_empty());
        assert_eq!(tiling.pop_render(0, false), None);
        assert_eq!(tiling.pop_denoise(3, true), None);
        assert!(!tiling.has_unfinished());
    }

    #[test]
    fn requeue_restores_generated_order_and_render_state() {
        let mut tiling = Tiling::generate(&params(48, 32)).expect("valid tiling");
        while let Some(index) = tiling.pop_render(0, false) {
            tiling.finish_tile(index, DenoisePass::Off, true);
        }
        assert!(!tiling.has_unfinished());

        tiling.requeue_for_render();
        assert!(tiling.tiles().iter().all(|tile| tile.state == TileState::Render));
        let queued = tiling.render_queues[0].iter().copied().collect::<Vec<_>>();
        assert_eq!(queued, tiling.generated_order()[0]);
    }
}
