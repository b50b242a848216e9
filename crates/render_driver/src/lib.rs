//! Host side of a tile render session: worker threads pull tiles from a shared
//! [`scheduler::TileManager`], the controlling thread composes written tiles into an
//! [`OutputImage`] and publishes progress.

mod image;
mod renderer;
mod session;

pub use image::OutputImage;
pub use renderer::TileRenderer;
pub use session::{
    CancelToken, ProgressReceiver, ProgressSample, RenderSession, SessionConfig, SessionError,
    SessionSummary, TileEvent,
};
