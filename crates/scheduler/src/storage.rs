use std::fmt;

use generational_arena::{Arena, Index};
use model::PixelRect;
use smallvec::SmallVec;
use tiles::NEIGHBOR_COUNT;

/// Per-tile accumulation storage.
///
/// `data` holds `pass_stride` floats per pixel, summed over `sample_count` samples. A denoise
/// pass stores its result separately in `denoised`, already normalized, so neighbors keep
/// reading the undenoised sums.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBuffer {
    width: u32,
    height: u32,
    pass_stride: usize,
    sample_count: u32,
    data: Vec<f32>,
    denoised: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileBufferError {
    SizeOverflow {
        width: u32,
        height: u32,
        pass_stride: usize,
    },
    AllocationFailed {
        bytes: usize,
    },
}

impl fmt::Display for TileBufferError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeOverflow {
                width,
                height,
                pass_stride,
            } => write!(
                formatter,
                "tile buffer of {width}x{height} pixels with {pass_stride} floats per pixel overflows"
            ),
            Self::AllocationFailed { bytes } => {
                write!(formatter, "failed to allocate {bytes} bytes of tile storage")
            }
        }
    }
}

impl std::error::Error for TileBufferError {}

impl TileBuffer {
    pub fn try_new(width: u32, height: u32, pass_stride: usize) -> Result<Self, TileBufferError> {
        let overflow = TileBufferError::SizeOverflow {
            width,
            height,
            pass_stride,
        };
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(pass_stride))
            .ok_or(overflow)?;
        let bytes = len
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or(overflow)?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| TileBufferError::AllocationFailed { bytes })?;
        data.resize(len, 0.0);

        Ok(Self {
            width,
            height,
            pass_stride,
            sample_count: 0,
            data,
            denoised: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pass_stride(&self) -> usize {
        self.pass_stride
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Counts samples added to `data`. A stored denoise result no longer matches and is dropped.
    pub fn add_samples(&mut self, samples: u32) {
        self.sample_count = self.sample_count.saturating_add(samples);
        self.denoised = None;
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Accumulated values of one pixel in tile-local coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let start = self.pixel_offset(x, y);
        &self.data[start..start + self.pass_stride]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [f32] {
        let start = self.pixel_offset(x, y);
        &mut self.data[start..start + self.pass_stride]
    }

    /// Sample-averaged value of one pixel channel, `0.0` before any sample landed.
    pub fn average(&self, x: u32, y: u32, channel: usize) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.pixel(x, y)[channel] / self.sample_count as f32
    }

    /// The whole buffer divided by its sample count, in `data` layout.
    pub fn averaged(&self) -> Vec<f32> {
        if self.sample_count == 0 {
            return vec![0.0; self.data.len()];
        }
        let scale = 1.0 / self.sample_count as f32;
        self.data.iter().map(|value| value * scale).collect()
    }

    pub fn denoised(&self) -> Option<&[f32]> {
        self.denoised.as_deref()
    }

    pub fn set_denoised(&mut self, pixels: Vec<f32>) {
        assert_eq!(
            pixels.len(),
            self.data.len(),
            "denoised pixels do not match the {}x{} tile buffer",
            self.width,
            self.height
        );
        self.denoised = Some(pixels);
    }

    fn pixel_offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} tile buffer",
            self.width,
            self.height
        );
        (y as usize * self.width as usize + x as usize) * self.pass_stride
    }
}

/// A stored neighbor buffer handed to a denoiser.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborBuffer {
    pub index: usize,
    pub rect: PixelRect,
    pub buffer: TileBuffer,
}

/// The 3x3 neighborhood around a tile in slot order, `None` where no buffer is stored.
pub type Neighborhood = SmallVec<[Option<NeighborBuffer>; NEIGHBOR_COUNT]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BufferSlot {
    #[default]
    Empty,
    Stored(Index),
    CheckedOut,
}

/// Tile buffers of the current tiling, one slot per tile.
#[derive(Debug, Default)]
pub(crate) struct BufferStore {
    arena: Arena<TileBuffer>,
    slots: Vec<BufferSlot>,
}

impl BufferStore {
    /// Drops every buffer and prepares empty slots for `tile_count` tiles.
    pub(crate) fn reset(&mut self, tile_count: usize) {
        let released = self.arena.len();
        self.arena.clear();
        self.slots.clear();
        self.slots.resize(tile_count, BufferSlot::Empty);
        if released > 0 {
            tracing::debug!(released, "released tile buffers");
        }
    }

    pub(crate) fn stored_count(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn checkout(
        &mut self,
        index: usize,
        width: u32,
        height: u32,
        pass_stride: usize,
    ) -> Result<TileBuffer, TileBufferError> {
        let slot = self.slot_mut(index);
        let stored = match *slot {
            BufferSlot::Empty => None,
            BufferSlot::Stored(handle) => Some(handle),
            BufferSlot::CheckedOut => panic!("tile {index} buffer is already checked out"),
        };

        let buffer = match stored.and_then(|handle| self.arena.remove(handle)) {
            Some(buffer) => buffer,
            None => TileBuffer::try_new(width, height, pass_stride)?,
        };
        *self.slot_mut(index) = BufferSlot::CheckedOut;
        Ok(buffer)
    }

    pub(crate) fn release(&mut self, index: usize, buffer: TileBuffer) {
        if *self.slot_mut(index) != BufferSlot::CheckedOut {
            panic!("tile {index} buffer released without being checked out");
        }
        let handle = self.arena.insert(buffer);
        *self.slot_mut(index) = BufferSlot::Stored(handle);
    }

    pub(crate) fn get(&self, index: usize) -> Option<&TileBuffer> {
        match self.slots.get(index)? {
            BufferSlot::Stored(handle) => self.arena.get(*handle),
            BufferSlot::Empty | BufferSlot::CheckedOut => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut TileBuffer> {
        match self.slots.get(index)? {
            BufferSlot::Stored(handle) => self.arena.get_mut(*handle),
            BufferSlot::Empty | BufferSlot::CheckedOut => None,
        }
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<TileBuffer> {
        let BufferSlot::Stored(handle) = *self.slots.get(index)? else {
            return None;
        };
        self.slots[index] = BufferSlot::Empty;
        self.arena.remove(handle)
    }

    pub(crate) fn free(&mut self, index: usize) {
        if self.take(index).is_some() {
            tracing::trace!(index, "freed tile buffer");
        }
    }

    fn slot_mut(&mut self, index: usize) -> &mut BufferSlot {
        let slots = self.slots.len();
        let Some(slot) = self.slots.get_mut(index) else {
            panic!("tile {index} has no buffer slot, tiling holds {slots} tiles");
        };
        slot
    }
}
