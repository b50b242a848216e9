use model::PixelRect;
use scheduler::TileBuffer;

/// Host-owned image the controlling thread writes finished tiles into.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputImage {
    width: u32,
    height: u32,
    channels: usize,
    pixels: Vec<f32>,
}

impl OutputImage {
    pub fn new(width: u32, height: u32, channels: usize) -> Self {
        let len = width as usize * height as usize * channels;
        Self {
            width,
            height,
            channels,
            pixels: vec![0.0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} output image",
            self.width,
            self.height
        );
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        &self.pixels[start..start + self.channels]
    }

    /// Copies a finished tile into place, preferring its denoised pixels.
    pub fn write_tile(&mut self, rect: PixelRect, buffer: &TileBuffer) {
        assert!(
            rect.right() <= self.width && rect.bottom() <= self.height,
            "tile {rect:?} outside {}x{} output image",
            self.width,
            self.height
        );
        assert!(
            buffer.width() == rect.width
                && buffer.height() == rect.height
                && buffer.pass_stride() == self.channels,
            "{}x{} tile buffer with {} channels does not fit tile {rect:?}",
            buffer.width(),
            buffer.height(),
            buffer.pass_stride()
        );

        let averaged;
        let source = match buffer.denoised() {
            Some(denoised) => denoised,
            None => {
                averaged = buffer.averaged();
                averaged.as_slice()
            }
        };

        let row_len = rect.width as usize * self.channels;
        for row in 0..rect.height as usize {
            let src = row * row_len;
            let dst = ((rect.y as usize + row) * self.width as usize + rect.x as usize)
                * self.channels;
            self.pixels[dst..dst + row_len].copy_from_slice(&source[src..src + row_len]);
        }
    }
}
