use crate::TileSize;

/// Position of step `d` along a Hilbert curve filling an `n * n` grid, `n` a power of two.
pub fn hilbert_index_to_pos(n: u32, mut d: u32) -> (u32, u32) {
    let (mut x, mut y) = (0, 0);
    let mut s = 1;
    while s < n {
        let rx = (d >> 1) & 1;
        let ry = (d ^ rx) & 1;
        if ry == 0 {
            if rx == 1 {
                x = s - 1 - x;
                y = s - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        x += rx * s;
        y += ry * s;
        d >>= 2;
        s *= 2;
    }
    (x, y)
}

/// Edge of a spiral block, in tiles.
pub(crate) fn hilbert_block_edge(tile_size: TileSize) -> u32 {
    if tile_size.width.max(tile_size.height) <= 12 {
        8
    } else {
        4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpiralDirection {
    Up,
    Left,
    Down,
    Right,
}

/// Pixel origins of all tiles in spiral visit order.
///
/// Blocks of `edge * edge` tiles are walked as a square spiral from the corner block inwards to
/// the center block. Inside a block tiles follow the Hilbert curve, rotated so that the curve
/// leaves the block next to where the spiral continues. The spiral square is centered on the
/// image and snapped to the tile grid, so origins outside the image are skipped.
pub(crate) fn spiral_tile_origins(
    image_width: u32,
    image_height: u32,
    tile_size: TileSize,
) -> Vec<(u32, u32)> {
    let edge = hilbert_block_edge(tile_size);
    let tile = (i64::from(tile_size.width), i64::from(tile_size.height));
    let block = (tile.0 * i64::from(edge), tile.1 * i64::from(edge));
    let image = (i64::from(image_width), i64::from(image_height));

    let blocks_x = blocks_along(image.0, block.0);
    let blocks_y = blocks_along(image.1, block.1);
    let n = blocks_x.max(blocks_y) | 1;
    let offset = (
        (image.0 - n * block.0) / 2 / tile.0 * tile.0,
        (image.1 - n * block.1) / 2 / tile.1 * tile.1,
    );
    let last = i64::from(edge) - 1;

    let mut origins = Vec::new();
    let mut block_pos = (0i64, 0i64);
    let mut direction = SpiralDirection::Up;
    let mut previous = SpiralDirection::Up;
    let mut ring = 0i64;
    loop {
        for step in 0..edge * edge {
            let (hx, hy) = hilbert_index_to_pos(edge, step);
            let (hx, hy) = (i64::from(hx), i64::from(hy));
            let (tx, ty) = if previous == SpiralDirection::Up && direction == SpiralDirection::Up {
                (hy, hx)
            } else if direction == SpiralDirection::Left || previous == SpiralDirection::Left {
                (hx, hy)
            } else if direction == SpiralDirection::Down {
                (last - hy, last - hx)
            } else {
                (last - hx, last - hy)
            };

            let x = block_pos.0 * block.0 + tx * tile.0 + offset.0;
            let y = block_pos.1 * block.1 + ty * tile.1 + offset.1;
            if x >= 0 && y >= 0 && x < image.0 && y < image.1 {
                origins.push((x as u32, y as u32));
            }
        }

        let center = (n - 1) / 2;
        if block_pos == (center, center) {
            break;
        }

        previous = direction;
        match direction {
            SpiralDirection::Up => {
                block_pos.1 += 1;
                if block_pos.1 == n - ring - 1 {
                    direction = SpiralDirection::Left;
                }
            }
            SpiralDirection::Left => {
                block_pos.0 += 1;
                if block_pos.0 == n - ring - 1 {
                    direction = SpiralDirection::Down;
                }
            }
            SpiralDirection::Down => {
                block_pos.1 -= 1;
                if block_pos.1 == ring {
                    direction = SpiralDirection::Right;
                }
            }
            SpiralDirection::Right => {
                block_pos.0 -= 1;
                if block_pos.0 == ring + 1 {
                    direction = SpiralDirection::Up;
                    ring += 1;
                }
            }
        }
    }
    origins
}

fn blocks_along(image_extent: i64, block_extent: i64) -> i64 {
    if block_extent >= image_extent {
        1
    } else {
        (image_extent + block_extent - 1) / block_extent
    }
}
