use scheduler::{Neighborhood, TileAssignment, TileBuffer};

/// The kernels a session runs on its tiles.
///
/// One renderer is shared by every worker thread of a session.
pub trait TileRenderer: Sync {
    /// Floats stored per pixel.
    fn pass_stride(&self) -> usize;

    /// Adds `task.num_samples` samples to every pixel of `buffer`. The session bumps the sample
    /// count afterwards.
    fn render(&self, task: &TileAssignment, buffer: &mut TileBuffer);

    fn needs_denoise(&self, _task: &TileAssignment) -> bool {
        false
    }

    /// Writes denoised, sample-averaged pixels of the center tile into `output`.
    ///
    /// `output` arrives filled with the center's averaged pixels, so the default leaves the tile
    /// as rendered.
    fn denoise(&self, _task: &TileAssignment, _neighborhood: &Neighborhood, _output: &mut [f32]) {
    }
}
