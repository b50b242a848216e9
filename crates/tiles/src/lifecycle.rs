use smallvec::SmallVec;

use crate::{TileState, Tiling};

/// Neighborhood slots, row-major over the 3x3 block around a tile:
///
/// ```text
/// 0 1 2
/// 3 4 5
/// 6 7 8
/// ```
pub const NEIGHBOR_COUNT: usize = 9;
pub const CENTER_NEIGHBOR: usize = 4;

const NEIGHBOR_DX: [isize; NEIGHBOR_COUNT] = [-1, 0, 1, -1, 0, 1, -1, 0, 1];
const NEIGHBOR_DY: [isize; NEIGHBOR_COUNT] = [-1, -1, -1, 0, 0, 0, 1, 1, 1];

/// Outcome of [`Tiling::finish_tile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileTransition {
    /// The caller should write the finished tile to the output now.
    pub write: bool,
    /// The finished tile's storage may be released once it has been written.
    pub free_current: bool,
    /// Neighbors that reached `Done` during this call and can be released right away.
    pub freed_neighbors: SmallVec<[usize; 8]>,
    /// Tiles advanced by the neighborhood rule, in slot order.
    pub promoted: SmallVec<[usize; NEIGHBOR_COUNT]>,
}

/// What happens to a tile after its render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoisePass {
    /// The session schedules no denoising.
    Off,
    /// The session denoises but this tile does not. Its buffer stays readable for neighbors.
    Skip,
    /// The tile goes through the denoise chain.
    Run,
}

impl Tiling {
    /// Tile index at neighborhood `slot` of `index`, or `None` past the grid border.
    pub fn neighbor_index(&self, index: usize, slot: usize) -> Option<usize> {
        assert!(
            index < self.tiles.len(),
            "neighbor lookup for tile {index} outside tiling of {} tiles",
            self.tiles.len()
        );
        assert!(slot < NEIGHBOR_COUNT, "neighbor slot {slot} out of range");

        let column = (index % self.tile_stride) as isize + NEIGHBOR_DX[slot];
        let row = (index / self.tile_stride) as isize + NEIGHBOR_DY[slot];
        if column < 0
            || row < 0
            || column as usize >= self.tile_stride
            || row as usize >= self.tile_rows
        {
            return None;
        }
        Some(row as usize * self.tile_stride + column as usize)
    }

    pub fn neighbors(&self, index: usize) -> SmallVec<[Option<usize>; NEIGHBOR_COUNT]> {
        (0..NEIGHBOR_COUNT)
            .map(|slot| self.neighbor_index(index, slot))
            .collect()
    }

    /// True when the tile and every neighbor inside the grid are at least `min_state`.
    pub fn neighborhood_reached(&self, index: usize, min_state: TileState) -> bool {
        self.tiles[index].state >= min_state
            && self
                .neighbors(index)
                .into_iter()
                .flatten()
                .all(|neighbor| self.tiles[neighbor].state >= min_state)
    }

    /// Advances a tile whose render or denoise work has completed.
    ///
    /// `pass` decides whether a rendered tile enters the denoise chain. With `progressive` set
    /// nothing is released, since the tiles accumulate further samples.
    pub fn finish_tile(
        &mut self,
        index: usize,
        pass: DenoisePass,
        progressive: bool,
    ) -> TileTransition {
        let state = self.tile(index).state;
        let mut transition = TileTransition::default();

        match state {
            TileState::Render if pass == DenoisePass::Run => {
                self.tiles[index].state = TileState::Rendered;
                self.promote_rendered(index, &mut transition);
            }
            TileState::Render => {
                self.tiles[index].state = TileState::Done;
                transition.write = true;
                if pass == DenoisePass::Off {
                    transition.free_current = !progressive;
                } else {
                    self.promote_rendered(index, &mut transition);
                    self.finish_denoised(index, progressive, &mut transition);
                }
            }
            TileState::Denoise => {
                self.tiles[index].state = TileState::Denoised;
                transition.write = true;
                self.finish_denoised(index, progressive, &mut transition);
            }
            TileState::Rendered | TileState::Denoised | TileState::Done => {
                panic!("finish_tile called for tile {index} in state {state:?}");
            }
        }

        tracing::trace!(
            index,
            from = ?state,
            to = ?self.tiles[index].state,
            promoted = transition.promoted.len(),
            "tile finished"
        );
        transition
    }

    /// Queues rendered tiles around `index` whose neighborhood is fully rendered.
    fn promote_rendered(&mut self, index: usize, transition: &mut TileTransition) {
        for neighbor in self.neighbors(index).into_iter().flatten() {
            if self.tiles[neighbor].state == TileState::Rendered
                && self.neighborhood_reached(neighbor, TileState::Rendered)
            {
                let tile = &mut self.tiles[neighbor];
                tile.state = TileState::Denoise;
                self.denoise_queues[tile.device].push_back(neighbor);
                transition.promoted.push(neighbor);
            }
        }
    }

    /// Completes tiles around `index` whose neighborhood reached `Denoised` with this call.
    ///
    /// `index` itself just moved past `Denoise`, so every neighborhood reached here completed
    /// now: denoised tiles become done, and done tiles that skipped denoising stop being
    /// read by their neighbors. Both are released unless `progressive`.
    fn finish_denoised(
        &mut self,
        index: usize,
        progressive: bool,
        transition: &mut TileTransition,
    ) {
        for (slot, neighbor) in self.neighbors(index).into_iter().enumerate() {
            let Some(neighbor) = neighbor else {
                continue;
            };
            if !self.neighborhood_reached(neighbor, TileState::Denoised) {
                continue;
            }
            if self.tiles[neighbor].state == TileState::Denoised {
                self.tiles[neighbor].state = TileState::Done;
                transition.promoted.push(neighbor);
            }
            if progressive {
                continue;
            }
            if slot == CENTER_NEIGHBOR {
                transition.free_current = true;
            } else {
                transition.freed_neighbors.push(neighbor);
            }
        }
    }
}
