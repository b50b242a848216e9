use model::PixelRect;
use render_driver::TileRenderer;
use scheduler::{Neighborhood, TileAssignment, TileBuffer};

const CHANNELS: usize = 3;
const NOISE_AMPLITUDE: f32 = 0.1;

/// Horizontal red and vertical green ramps over the full frame, with per-sample noise in blue.
#[derive(Debug, Clone, Copy)]
pub struct GradientRenderer {
    width: u32,
    height: u32,
    denoise: bool,
}

impl GradientRenderer {
    pub fn new(width: u32, height: u32, denoise: bool) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            denoise,
        }
    }

    fn shade(&self, x: u32, y: u32, divider: u32, sample: u64) -> [f32; CHANNELS] {
        let center = |coordinate: u32| (coordinate * divider) as f32 + divider as f32 * 0.5;
        let red = (center(x) / self.width as f32).min(1.0);
        let green = (center(y) / self.height as f32).min(1.0);
        let blue = 0.5 + NOISE_AMPLITUDE * (unit_hash(x, y, sample) - 0.5);
        [red, green, blue]
    }
}

impl TileRenderer for GradientRenderer {
    fn pass_stride(&self) -> usize {
        CHANNELS
    }

    fn render(&self, task: &TileAssignment, buffer: &mut TileBuffer) {
        let rect = task.rect;
        for local_y in 0..rect.height {
            for local_x in 0..rect.width {
                let pixel = buffer.pixel_mut(local_x, local_y);
                for offset in 0..u64::from(task.num_samples) {
                    let color = self.shade(
                        rect.x + local_x,
                        rect.y + local_y,
                        task.resolution_divider,
                        task.sample + offset,
                    );
                    for (value, channel) in pixel.iter_mut().zip(color) {
                        *value += channel;
                    }
                }
            }
        }
    }

    fn needs_denoise(&self, _task: &TileAssignment) -> bool {
        self.denoise
    }

    /// 3x3 box filter across tile borders, skipping pixels whose tile has no stored buffer.
    fn denoise(&self, task: &TileAssignment, neighborhood: &Neighborhood, output: &mut [f32]) {
        let rect = task.rect;
        for local_y in 0..rect.height {
            for local_x in 0..rect.width {
                let x = rect.x + local_x;
                let y = rect.y + local_y;
                let mut sum = [0.0; CHANNELS];
                let mut count = 0;
                for ny in y.saturating_sub(1)..=y + 1 {
                    for nx in x.saturating_sub(1)..=x + 1 {
                        let Some((buffer, neighbor)) = buffer_at(neighborhood, nx, ny) else {
                            continue;
                        };
                        for (channel, total) in sum.iter_mut().enumerate() {
                            *total += buffer.average(nx - neighbor.x, ny - neighbor.y, channel);
                        }
                        count += 1;
                    }
                }
                if count == 0 {
                    continue;
                }
                let start = (local_y as usize * rect.width as usize + local_x as usize) * CHANNELS;
                for (value, total) in output[start..start + CHANNELS].iter_mut().zip(sum) {
                    *value = total / count as f32;
                }
            }
        }
    }
}

fn buffer_at(neighborhood: &Neighborhood, x: u32, y: u32) -> Option<(&TileBuffer, PixelRect)> {
    neighborhood
        .iter()
        .flatten()
        .find(|neighbor| neighbor.rect.contains(x, y))
        .map(|neighbor| (&neighbor.buffer, neighbor.rect))
}

/// Deterministic value in `[0, 1)` per pixel and sample.
fn unit_hash(x: u32, y: u32, sample: u64) -> f32 {
    let mut state = u64::from(x)
        ^ (u64::from(y) << 21)
        ^ sample.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    state ^= state >> 33;
    state = state.wrapping_mul(0xff51_afd7_ed55_8ccd);
    state ^= state >> 33;
    state = state.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    state ^= state >> 33;
    (state >> 40) as f32 / (1u64 << 24) as f32
}
