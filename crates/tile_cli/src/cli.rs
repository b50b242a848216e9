use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use model::ResolutionLimit;
use scheduler::SampleLimit;
use tiles::TileOrder;

#[derive(Parser)]
#[command(
    name = "tilesched",
    author,
    version,
    about = "Plan and simulate progressive tile rendering"
)]
pub struct Arguments {
    /// Log scheduler steps. `RUST_LOG` refines the filter.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print every progression step of a session as one JSON line.
    Plan {
        #[command(flatten)]
        session: SessionArguments,
        /// Stop after this many steps. Required for unlimited samples.
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Print the full resolution tiling and its per-device visit order.
    Order {
        #[command(flatten)]
        session: SessionArguments,
        /// Print a grid of visit ranks instead of JSON.
        #[arg(long)]
        grid: bool,
    },
    /// Run a session with a synthetic gradient renderer and print a JSON summary.
    Render {
        #[command(flatten)]
        session: SessionArguments,
        /// Worker threads, one per device by default.
        #[arg(long)]
        workers: Option<usize>,
        /// Pretty-print JSON output.
        #[arg(long)]
        pretty: bool,
    },
}

/// Session settings shared by every command. Flags override the config file.
#[derive(Args, Debug, Default)]
pub struct SessionArguments {
    /// TOML file with `[image]` and `[scheduler]` tables.
    #[arg(long, short = 'c', value_parser)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// Sample count or `unlimited`.
    #[arg(long)]
    pub samples: Option<SampleLimit>,
    /// Longest edge of the first progressive step or `unlimited`.
    #[arg(long)]
    pub start_resolution: Option<ResolutionLimit>,
    #[arg(long)]
    pub pixel_size: Option<u32>,
    /// Square tile edge in pixels.
    #[arg(long)]
    pub tile_size: Option<u32>,
    #[arg(long)]
    pub order: Option<TileOrder>,
    #[arg(long)]
    pub devices: Option<usize>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub progressive: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub background: Option<bool>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub preserve_device: Option<bool>,
    /// Schedule a denoise pass over every tile.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub denoise: Option<bool>,
}
