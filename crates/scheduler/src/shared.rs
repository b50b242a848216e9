use std::sync::{Arc, Mutex, MutexGuard};

use crate::manager::{TileAssignment, TileFinish, TileKinds, TileManager};
use crate::progress::Progress;
use crate::storage::{Neighborhood, TileBuffer, TileBufferError};

/// Result of finishing a tile through the shared handle.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTile {
    pub finish: TileFinish,
    /// The buffer to write, present when `finish.write` is set. Taken out of the manager when
    /// the tile is freed, copied otherwise.
    pub buffer: Option<TileBuffer>,
}

/// A [`TileManager`] behind one coarse lock, shared by the controlling thread and workers.
///
/// Every method takes the lock once, so a queue pop or a state transition is never observed
/// half done by another worker.
#[derive(Debug, Clone)]
pub struct SharedTileManager {
    inner: Arc<Mutex<TileManager>>,
}

impl SharedTileManager {
    pub fn new(manager: TileManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TileManager> {
        self.inner
            .lock()
            .unwrap_or_else(|_| panic!("tile manager lock poisoned"))
    }

    pub fn next_tile(&self, device: usize, kinds: TileKinds) -> Option<TileAssignment> {
        self.lock().next_tile(device, kinds)
    }

    pub fn has_tiles(&self) -> bool {
        self.lock().has_tiles()
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress()
    }

    pub fn acquire_buffer(
        &self,
        index: usize,
        pass_stride: usize,
    ) -> Result<TileBuffer, TileBufferError> {
        self.lock().acquire_buffer(index, pass_stride)
    }

    pub fn release_buffer(&self, index: usize, buffer: TileBuffer) {
        self.lock().release_buffer(index, buffer);
    }

    pub fn neighborhood_buffers(&self, index: usize) -> Neighborhood {
        self.lock().neighborhood_buffers(index)
    }

    pub fn store_denoised(&self, index: usize, pixels: Vec<f32>) {
        self.lock().store_denoised(index, pixels);
    }

    /// Finishes a tile and, when it has to be written, hands out its buffer in the same
    /// critical section.
    pub fn finish_tile(&self, index: usize, need_denoise: bool) -> FinishedTile {
        let mut manager = self.lock();
        let finish = manager.finish_tile(index, need_denoise);
        let buffer = match (finish.write, finish.free) {
            (false, _) => None,
            (true, true) => manager.take_tile_buffer(index),
            (true, false) => manager.tile_buffer(index).cloned(),
        };
        FinishedTile { finish, buffer }
    }

    /// Returns the manager when this is the last handle.
    pub fn try_unwrap(self) -> Result<TileManager, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex
                .into_inner()
                .unwrap_or_else(|_| panic!("tile manager lock poisoned"))),
            Err(inner) => Err(Self { inner }),
        }
    }
}
