use bitflags::bitflags;
use model::{BufferParams, PixelRect, compute_divider};
use serde::Serialize;
use tiles::{DenoisePass, NEIGHBOR_COUNT, TileState, Tiling};

use crate::config::{SchedulerConfig, SchedulerConfigError, validate_sample_range};
use crate::progress::Progress;
use crate::samples::{SampleBudget, SampleLimit, SampleRange};
use crate::storage::{BufferStore, NeighborBuffer, Neighborhood, TileBuffer, TileBufferError};

bitflags! {
    /// Kinds of work a caller of [`TileManager::next_tile`] accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TileKinds: u8 {
        const RENDER = 1;
        const DENOISE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileWork {
    Render,
    Denoise,
}

/// A tile handed to a worker for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileAssignment {
    pub index: usize,
    pub rect: PixelRect,
    pub device: usize,
    pub work: TileWork,
    /// First sample of the current step.
    pub sample: u64,
    pub num_samples: u32,
    pub resolution_divider: u32,
}

/// What the caller owes after [`TileManager::finish_tile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileFinish {
    /// Write the tile to the output now.
    pub write: bool,
    /// Release the tile's buffer after writing it.
    pub free: bool,
}

/// Snapshot of the progression state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerState {
    pub sample: i64,
    pub num_samples: u32,
    pub resolution_divider: u32,
    pub buffer: BufferParams,
    pub total_pixel_samples: u64,
    pub num_tiles: usize,
}

/// Drives the resolution and sample progression of a session and owns its tiles.
///
/// The controlling thread calls [`reset`](Self::reset) once and [`next`](Self::next) until it
/// returns false. Workers pull tiles with [`next_tile`](Self::next_tile) and report them with
/// [`finish_tile`](Self::finish_tile); when several workers do so concurrently the manager has
/// to sit behind one lock, see [`SharedTileManager`](crate::SharedTileManager).
#[derive(Debug)]
pub struct TileManager {
    config: SchedulerConfig,
    params: BufferParams,
    budget: SampleBudget,
    buffer: BufferParams,
    sample: i64,
    num_samples: u32,
    resolution_divider: u32,
    total_pixel_samples: u64,
    completed_pixel_samples: u64,
    tiling: Tiling,
    buffers: BufferStore,
}

impl TileManager {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerConfigError> {
        config.validate()?;
        let mut manager = Self {
            config,
            params: BufferParams::default(),
            budget: SampleBudget {
                samples: config.samples,
                range: config.sample_range,
            },
            buffer: BufferParams::default(),
            sample: -1,
            num_samples: 0,
            resolution_divider: 1,
            total_pixel_samples: 0,
            completed_pixel_samples: 0,
            tiling: Tiling::default(),
            buffers: BufferStore::default(),
        };
        manager.reset(BufferParams::default(), config.samples);
        Ok(manager)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts a new session for `params`, before the first sample.
    pub fn reset(&mut self, params: BufferParams, samples: SampleLimit) {
        self.params = params;
        self.set_samples(samples);

        self.buffer = BufferParams::default();
        self.sample = self.budget.range_start() - 1;
        self.num_samples = 0;
        self.resolution_divider =
            compute_divider(params.width, params.height, self.config.start_resolution);
        self.completed_pixel_samples = 0;
        self.tiling = Tiling::default();
        self.buffers.reset(0);

        tracing::debug!(
            width = params.width,
            height = params.height,
            samples = %samples,
            divider = self.resolution_divider,
            total_pixel_samples = self.total_pixel_samples,
            "tile manager reset"
        );
    }

    pub fn set_samples(&mut self, samples: SampleLimit) {
        self.budget.samples = samples;
        self.update_total();
    }

    /// Restricts rendering to a sub-range of samples. The sample counter picks up the new
    /// start at the next [`reset`](Self::reset).
    pub fn set_sample_range(
        &mut self,
        range: Option<SampleRange>,
    ) -> Result<(), SchedulerConfigError> {
        validate_sample_range(range)?;
        self.budget.range = range;
        self.update_total();
        Ok(())
    }

    pub fn sample_range(&self) -> Option<SampleRange> {
        self.budget.range
    }

    pub fn num_effective_samples(&self) -> u32 {
        self.budget.effective_samples()
    }

    pub fn done(&self) -> bool {
        self.resolution_divider == self.config.pixel_size
            && self.sample + i64::from(self.num_samples) >= self.budget.end_sample()
    }

    /// Advances to the next step. Returns false once the session is done.
    pub fn next(&mut self) -> bool {
        if self.done() {
            return false;
        }

        let pixel_size = self.config.pixel_size;
        if self.config.progressive && self.resolution_divider > pixel_size {
            self.sample = 0;
            self.resolution_divider = (self.resolution_divider / 2).max(pixel_size);
            self.num_samples = 1;
            self.set_tiles();
        } else {
            self.sample += 1;
            self.num_samples = self.budget.step_samples(self.config.progressive);
            self.resolution_divider = pixel_size;

            if self.sample == self.budget.range_start() {
                self.set_tiles();
            } else {
                self.tiling.requeue_for_render();
            }
        }

        tracing::debug!(
            sample = self.sample,
            num_samples = self.num_samples,
            divider = self.resolution_divider,
            width = self.buffer.width,
            height = self.buffer.height,
            "tile manager step"
        );
        true
    }

    fn set_tiles(&mut self) {
        self.buffer = self.params.divided(self.resolution_divider);
        let params = self
            .config
            .tiling_params(self.buffer.width, self.buffer.height);
        self.tiling = Tiling::generate(&params).unwrap_or_else(|error| {
            panic!("validated scheduler config produced an invalid tiling: {error}")
        });
        self.buffers.reset(self.tiling.len());
    }

    fn update_total(&mut self) {
        self.total_pixel_samples = self.budget.total_pixel_samples(
            &self.params,
            self.config.start_resolution,
            self.config.pixel_size,
            self.config.progressive,
            self.config.schedule_denoising,
        );
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState {
            sample: self.sample,
            num_samples: self.num_samples,
            resolution_divider: self.resolution_divider,
            buffer: self.buffer,
            total_pixel_samples: self.total_pixel_samples,
            num_tiles: self.tiling.len(),
        }
    }

    pub fn buffer_params(&self) -> BufferParams {
        self.buffer
    }

    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// Pops the next tile for `device`. Denoise work is preferred when both kinds are accepted.
    pub fn next_tile(&mut self, device: usize, kinds: TileKinds) -> Option<TileAssignment> {
        let preserve_device = self.config.preserve_tile_device && device < self.config.num_devices;

        if kinds.contains(TileKinds::DENOISE) {
            if let Some(index) = self.tiling.pop_denoise(device, preserve_device) {
                return Some(self.assignment(index, TileWork::Denoise));
            }
        }
        if kinds.contains(TileKinds::RENDER) {
            if let Some(index) = self.tiling.pop_render(device, preserve_device) {
                return Some(self.assignment(index, TileWork::Render));
            }
        }
        None
    }

    fn assignment(&self, index: usize, work: TileWork) -> TileAssignment {
        let tile = self.tiling.tile(index);
        TileAssignment {
            index,
            rect: tile.rect,
            device: tile.device,
            work,
            sample: self.sample.max(0) as u64,
            num_samples: self.num_samples,
            resolution_divider: self.resolution_divider,
        }
    }

    /// Records finished work on a tile.
    ///
    /// Neighbors whose neighborhood completed during this call lose their buffers right away.
    /// The finished tile's own buffer stays until the caller wrote it and calls
    /// [`take_tile_buffer`](Self::take_tile_buffer).
    ///
    /// With denoising scheduled, a rendered tile that does not `need_denoise` is done at once
    /// and counts its skipped denoise pass as completed work.
    pub fn finish_tile(&mut self, index: usize, need_denoise: bool) -> TileFinish {
        let tile = *self.tiling.tile(index);
        let pass = match (self.config.schedule_denoising, need_denoise) {
            (false, _) => DenoisePass::Off,
            (true, false) => DenoisePass::Skip,
            (true, true) => DenoisePass::Run,
        };
        let transition = self
            .tiling
            .finish_tile(index, pass, self.config.progressive);

        let area = tile.rect.area();
        let work = match tile.state {
            TileState::Render if pass == DenoisePass::Skip => {
                area.saturating_mul(u64::from(self.num_samples) + 1)
            }
            TileState::Render => area.saturating_mul(u64::from(self.num_samples)),
            _ => area,
        };
        self.completed_pixel_samples = self.completed_pixel_samples.saturating_add(work);

        for &neighbor in &transition.freed_neighbors {
            self.buffers.free(neighbor);
        }

        TileFinish {
            write: transition.write,
            free: transition.free_current,
        }
    }

    /// True while some tile of the current step is not done.
    pub fn has_tiles(&self) -> bool {
        self.tiling.has_unfinished()
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.completed_pixel_samples, self.total_pixel_samples)
    }

    /// Checks out the buffer of a tile, allocating it on first use.
    pub fn acquire_buffer(
        &mut self,
        index: usize,
        pass_stride: usize,
    ) -> Result<TileBuffer, TileBufferError> {
        let rect = self.tiling.tile(index).rect;
        self.buffers
            .checkout(index, rect.width, rect.height, pass_stride)
    }

    pub fn release_buffer(&mut self, index: usize, buffer: TileBuffer) {
        self.buffers.release(index, buffer);
    }

    pub fn tile_buffer(&self, index: usize) -> Option<&TileBuffer> {
        self.buffers.get(index)
    }

    pub fn take_tile_buffer(&mut self, index: usize) -> Option<TileBuffer> {
        self.buffers.take(index)
    }

    /// Attaches the result of a denoise pass to the tile's stored buffer.
    pub fn store_denoised(&mut self, index: usize, pixels: Vec<f32>) {
        let Some(buffer) = self.buffers.get_mut(index) else {
            panic!("tile {index} has no stored buffer to attach denoised pixels to");
        };
        buffer.set_denoised(pixels);
    }

    /// Copies of the stored buffers around a tile, in neighborhood slot order.
    pub fn neighborhood_buffers(&self, index: usize) -> Neighborhood {
        let mut neighborhood = Neighborhood::with_capacity(NEIGHBOR_COUNT);
        for neighbor in self.tiling.neighbors(index) {
            neighborhood.push(neighbor.and_then(|neighbor| {
                self.buffers.get(neighbor).map(|buffer| NeighborBuffer {
                    index: neighbor,
                    rect: self.tiling.tile(neighbor).rect,
                    buffer: buffer.clone(),
                })
            }));
        }
        neighborhood
    }

    pub fn stored_buffers(&self) -> usize {
        self.buffers.stored_count()
    }
}
