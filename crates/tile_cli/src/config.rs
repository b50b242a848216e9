use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use model::BufferParams;
use scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use tiles::TileSize;

use crate::cli::SessionArguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Everything a command needs to build a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub image: ImageSize,
    pub scheduler: SchedulerConfig,
}

impl CliConfig {
    /// Loads the optional config file, applies flag overrides and validates the result.
    pub fn resolve(arguments: &SessionArguments) -> Result<Self> {
        let mut config = match &arguments.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(arguments);
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn apply(&mut self, arguments: &SessionArguments) {
        let scheduler = &mut self.scheduler;
        if let Some(width) = arguments.width {
            self.image.width = width;
        }
        if let Some(height) = arguments.height {
            self.image.height = height;
        }
        if let Some(samples) = arguments.samples {
            scheduler.samples = samples;
        }
        if let Some(start_resolution) = arguments.start_resolution {
            scheduler.start_resolution = start_resolution;
        }
        if let Some(pixel_size) = arguments.pixel_size {
            scheduler.pixel_size = pixel_size;
        }
        if let Some(edge) = arguments.tile_size {
            scheduler.tile_size = TileSize::square(edge);
        }
        if let Some(order) = arguments.order {
            scheduler.tile_order = order;
        }
        if let Some(devices) = arguments.devices {
            scheduler.num_devices = devices;
        }
        if let Some(progressive) = arguments.progressive {
            scheduler.progressive = progressive;
        }
        if let Some(background) = arguments.background {
            scheduler.background = background;
        }
        if let Some(preserve_device) = arguments.preserve_device {
            scheduler.preserve_tile_device = preserve_device;
        }
        if let Some(denoise) = arguments.denoise {
            scheduler.schedule_denoising = denoise;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.width == 0 || self.image.height == 0 {
            bail!(
                "image size {}x{} must be non-zero",
                self.image.width,
                self.image.height
            );
        }
        self.scheduler
            .validate()
            .context("invalid scheduler config")
    }

    pub fn buffer_params(&self) -> BufferParams {
        BufferParams::new(self.image.width, self.image.height)
    }
}
