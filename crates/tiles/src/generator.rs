use std::collections::VecDeque;

use bitvec::prelude::*;
use model::PixelRect;
use serde::{Deserialize, Serialize};

use crate::hilbert::spiral_tile_origins;
use crate::{Tile, TileOrder, TileSize, TileState, Tiling, TilingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingParams {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_size: TileSize,
    pub order: TileOrder,
    pub num_devices: usize,
    /// Give every device its own queue even when the image is not sliced.
    pub preserve_device: bool,
    /// Cut the image into one horizontal band per device.
    pub sliced: bool,
    /// Extra rows of context around each band. Tiles only cover the band itself.
    pub slice_overlap: u32,
}

/// A horizontal band of the image owned by one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSlice {
    pub index: usize,
    pub device: usize,
    pub y: u32,
    pub height: u32,
    pub context_y: u32,
    pub context_height: u32,
}

impl TilingParams {
    pub fn validate(&self) -> Result<(), TilingError> {
        if self.tile_size.width == 0 || self.tile_size.height == 0 {
            return Err(TilingError::ZeroTileSize);
        }
        if self.num_devices == 0 {
            return Err(TilingError::NoDevices);
        }
        if self.order == TileOrder::HilbertSpiral {
            if self.sliced {
                return Err(TilingError::HilbertSpiralSliced);
            }
            if self.slice_overlap != 0 {
                return Err(TilingError::HilbertSpiralOverlap);
            }
        }
        Ok(())
    }

    /// Number of device queues the tiling produces.
    pub fn queue_count(&self) -> usize {
        if self.preserve_device || self.sliced {
            self.image_height.max(1).min(clamp_to_u32(self.num_devices)) as usize
        } else {
            1
        }
    }
}

impl Tiling {
    /// Splits the image into tiles and fills the per-device render queues.
    pub fn generate(params: &TilingParams) -> Result<Tiling, TilingError> {
        params.validate()?;
        let image_width = params.image_width.max(1);
        let image_height = params.image_height.max(1);
        let queue_count = params.queue_count();
        let tile_stride = tiles_along(image_width, params.tile_size.width);

        let mut tiling = if params.order == TileOrder::HilbertSpiral {
            generate_spiral(image_width, image_height, tile_stride, queue_count, params)
        } else {
            generate_rows(image_width, image_height, tile_stride, queue_count, params)
        };
        tiling.image_width = image_width;
        tiling.image_height = image_height;
        tiling.tile_stride = tile_stride;
        tiling.tile_rows = tiling.tiles.len() / tile_stride;
        tiling.render_queues = tiling
            .generated_order
            .iter()
            .map(|order| order.iter().copied().collect())
            .collect();
        tiling.denoise_queues = vec![VecDeque::new(); queue_count];

        tracing::debug!(
            image_width,
            image_height,
            tiles = tiling.tiles.len(),
            queues = queue_count,
            order = %params.order,
            sliced = params.sliced,
            "generated tiling"
        );
        Ok(tiling)
    }
}

fn generate_spiral(
    image_width: u32,
    image_height: u32,
    tile_stride: usize,
    queue_count: usize,
    params: &TilingParams,
) -> Tiling {
    let tile_size = params.tile_size;
    let tile_rows = tiles_along(image_height, tile_size.height);
    let total = tile_stride * tile_rows;
    let tiles_per_device = total.div_ceil(queue_count);

    let mut slots: Vec<Option<Tile>> = vec![None; total];
    let mut placed = bitvec![0; total];
    let mut lists = vec![VecDeque::new(); queue_count];
    let (mut device, mut assigned) = (0, 0);

    for (x, y) in spiral_tile_origins(image_width, image_height, tile_size) {
        let column = (x / tile_size.width) as usize;
        let row = (y / tile_size.height) as usize;
        let index = row * tile_stride + column;
        if placed.replace(index, true) {
            panic!("hilbert spiral visited tile {index} twice");
        }
        slots[index] = Some(Tile {
            index,
            rect: PixelRect::new(
                x,
                y,
                tile_size.width.min(image_width - x),
                tile_size.height.min(image_height - y),
            ),
            device,
            slice: 0,
            state: TileState::Render,
        });
        lists[device].push_front(index);
        assigned += 1;
        if assigned == tiles_per_device {
            device += 1;
            assigned = 0;
        }
    }

    let tiles = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| panic!("hilbert spiral never visited tile {index}"))
        })
        .collect();

    Tiling {
        tiles,
        slices: vec![ImageSlice {
            index: 0,
            device: 0,
            y: 0,
            height: image_height,
            context_y: 0,
            context_height: image_height,
        }],
        generated_order: lists.into_iter().map(Vec::from).collect(),
        ..Tiling::default()
    }
}

fn generate_rows(
    image_width: u32,
    image_height: u32,
    tile_stride: usize,
    queue_count: usize,
    params: &TilingParams,
) -> Tiling {
    let tile_size = params.tile_size;
    let order = params.order;
    let center = (image_width / 2, image_height / 2);
    let slice_count = if params.sliced { queue_count } else { 1 };
    let band = image_height / slice_count as u32;

    let mut tiles: Vec<Tile> = Vec::new();
    let mut slices = Vec::with_capacity(slice_count);
    let mut lists: Vec<VecDeque<usize>> = vec![VecDeque::new(); queue_count];

    let sort_list = |list: &mut VecDeque<usize>, tiles: &[Tile]| {
        if order.needs_sort() {
            list.make_contiguous()
                .sort_by(|&a, &b| order.compare(center, &tiles[a].rect, &tiles[b].rect));
        }
    };

    for slice in 0..slice_count {
        let slice_y = band * slice as u32;
        let slice_height = if slice == slice_count - 1 {
            image_height - slice_y
        } else {
            band
        };
        let context_y = slice_y.saturating_sub(params.slice_overlap);
        let context_bottom = slice_y
            .saturating_add(slice_height)
            .saturating_add(params.slice_overlap)
            .min(image_height);
        slices.push(ImageSlice {
            index: slice,
            device: slice,
            y: slice_y,
            height: slice_height,
            context_y,
            context_height: context_bottom - context_y,
        });

        let tile_rows = tiles_along(slice_height, tile_size.height);
        let tiles_per_device = (tile_stride * tile_rows).div_ceil(queue_count);
        let (mut device, mut assigned) = (0, 0);

        for row in 0..tile_rows {
            for column in 0..tile_stride {
                let x = column as u32 * tile_size.width;
                let y = row as u32 * tile_size.height;
                let width = if column == tile_stride - 1 {
                    image_width - x
                } else {
                    tile_size.width
                };
                let height = if row == tile_rows - 1 {
                    slice_height - y
                } else {
                    tile_size.height
                };
                let owner = if params.sliced { slice } else { device };
                let index = tiles.len();
                tiles.push(Tile {
                    index,
                    rect: PixelRect::new(x, slice_y + y, width, height),
                    device: owner,
                    slice,
                    state: TileState::Render,
                });
                lists[owner].push_back(index);

                if !params.sliced {
                    assigned += 1;
                    if assigned == tiles_per_device {
                        sort_list(&mut lists[device], &tiles);
                        device += 1;
                        assigned = 0;
                    }
                }
            }
        }

        if params.sliced {
            sort_list(&mut lists[slice], &tiles);
        } else if assigned > 0 {
            sort_list(&mut lists[device], &tiles);
        }
    }

    Tiling {
        tiles,
        slices,
        generated_order: lists.into_iter().map(Vec::from).collect(),
        ..Tiling::default()
    }
}

fn tiles_along(image_extent: u32, tile_extent: u32) -> usize {
    if tile_extent >= image_extent {
        1
    } else {
        image_extent.div_ceil(tile_extent) as usize
    }
}

fn clamp_to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
