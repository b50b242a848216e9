use std::fmt;

use model::ResolutionLimit;
use serde::{Deserialize, Serialize};
use tiles::{TileOrder, TileSize, TilingError, TilingParams};

use crate::samples::{SampleLimit, SampleRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Refine the whole image by resolution, then one sample per step.
    pub progressive: bool,
    pub samples: SampleLimit,
    pub start_resolution: ResolutionLimit,
    /// Finest resolution divider, the size of one rendered pixel block.
    pub pixel_size: u32,
    pub tile_size: TileSize,
    pub tile_order: TileOrder,
    pub num_devices: usize,
    pub preserve_tile_device: bool,
    /// Offline session: tiles are bucketed by count instead of sliced per device.
    pub background: bool,
    pub schedule_denoising: bool,
    pub slice_overlap: u32,
    pub sample_range: Option<SampleRange>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            progressive: true,
            samples: SampleLimit::default(),
            start_resolution: ResolutionLimit::default(),
            pixel_size: 1,
            tile_size: TileSize::default(),
            tile_order: TileOrder::default(),
            num_devices: 1,
            preserve_tile_device: false,
            background: false,
            schedule_denoising: false,
            slice_overlap: 0,
            sample_range: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerConfigError {
    ZeroPixelSize,
    ZeroStartResolution,
    ZeroSamples,
    ZeroTileSize,
    NoDevices,
    EmptySampleRange,
    HilbertSpiralRequiresUnslicedTiling,
}

impl fmt::Display for SchedulerConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroPixelSize => write!(formatter, "pixel size must be at least 1"),
            Self::ZeroStartResolution => {
                write!(formatter, "start resolution must be at least 1 or unlimited")
            }
            Self::ZeroSamples => write!(formatter, "sample count must be at least 1 or unlimited"),
            Self::ZeroTileSize => write!(formatter, "tile width and height must be non-zero"),
            Self::NoDevices => write!(formatter, "at least one device is required"),
            Self::EmptySampleRange => write!(formatter, "sample range must contain at least one sample"),
            Self::HilbertSpiralRequiresUnslicedTiling => write!(
                formatter,
                "hilbert spiral order requires background tiling without slice overlap"
            ),
        }
    }
}

impl std::error::Error for SchedulerConfigError {}

impl From<TilingError> for SchedulerConfigError {
    fn from(error: TilingError) -> Self {
        match error {
            TilingError::ZeroTileSize => Self::ZeroTileSize,
            TilingError::NoDevices => Self::NoDevices,
            TilingError::HilbertSpiralSliced | TilingError::HilbertSpiralOverlap => {
                Self::HilbertSpiralRequiresUnslicedTiling
            }
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerConfigError> {
        if self.pixel_size == 0 {
            return Err(SchedulerConfigError::ZeroPixelSize);
        }
        if self.start_resolution == ResolutionLimit::Limited(0) {
            return Err(SchedulerConfigError::ZeroStartResolution);
        }
        if self.samples == SampleLimit::Finite(0) {
            return Err(SchedulerConfigError::ZeroSamples);
        }
        validate_sample_range(self.sample_range)?;
        self.tiling_params(1, 1).validate()?;
        Ok(())
    }

    /// Tiling parameters for an image of the given size at the current resolution.
    pub fn tiling_params(&self, image_width: u32, image_height: u32) -> TilingParams {
        TilingParams {
            image_width,
            image_height,
            tile_size: self.tile_size,
            order: self.tile_order,
            num_devices: self.num_devices,
            preserve_device: self.preserve_tile_device,
            sliced: !self.background,
            slice_overlap: self.slice_overlap,
        }
    }
}

pub(crate) fn validate_sample_range(
    range: Option<SampleRange>,
) -> Result<(), SchedulerConfigError> {
    match range {
        Some(range) if range.num == 0 => Err(SchedulerConfigError::EmptySampleRange),
        _ => Ok(()),
    }
}
