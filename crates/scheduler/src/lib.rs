//! Progressive tile scheduling: resolution and sample progression, per-device tile queues,
//! the render/denoise state machine and per-tile buffer storage.

mod config;
mod manager;
mod progress;
mod samples;
mod shared;
mod storage;

pub use config::{SchedulerConfig, SchedulerConfigError};
pub use manager::{
    SchedulerState, TileAssignment, TileFinish, TileKinds, TileManager, TileWork,
};
pub use progress::Progress;
pub use samples::{SampleBudget, SampleLimit, SampleRange};
pub use shared::{FinishedTile, SharedTileManager};
pub use storage::{NeighborBuffer, Neighborhood, TileBuffer, TileBufferError};

#[cfg(test)]
mod tests;
