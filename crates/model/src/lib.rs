use serde::{Deserialize, Serialize};

mod divider;

pub use divider::{ResolutionLimit, compute_divider, first_progressive_divider};

/// Pixel dimensions of the render target and its placement inside the full frame.
///
/// For border renders the buffer covers only part of the frame: `full_x`/`full_y`
/// locate it and `full_width`/`full_height` describe the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferParams {
    pub width: u32,
    pub height: u32,
    pub full_x: i32,
    pub full_y: i32,
    pub full_width: u32,
    pub full_height: u32,
}

impl BufferParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            full_x: 0,
            full_y: 0,
            full_width: width,
            full_height: height,
        }
    }

    pub fn with_full_frame(
        self,
        full_x: i32,
        full_y: i32,
        full_width: u32,
        full_height: u32,
    ) -> Self {
        Self {
            full_x,
            full_y,
            full_width,
            full_height,
            ..self
        }
    }

    /// Geometry of this buffer at `1 / divider` resolution. Extents never drop below one pixel.
    pub fn divided(&self, divider: u32) -> Self {
        assert!(divider > 0, "resolution divider must be at least 1");
        Self {
            width: divided_extent(self.width, divider),
            height: divided_extent(self.height, divider),
            full_x: self.full_x / divider as i32,
            full_y: self.full_y / divider as i32,
            full_width: divided_extent(self.full_width, divider),
            full_height: divided_extent(self.full_height, divider),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

pub fn divided_extent(extent: u32, divider: u32) -> u32 {
    (extent / divider).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}
