mod cli;
mod commands;
mod config;
mod logging;
mod synthetic;

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::{Arguments, Command};
use crate::config::CliConfig;

fn main() -> Result<()> {
    let arguments = Arguments::parse();
    logging::init(arguments.verbose);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match &arguments.command {
        Command::Plan { session, max_steps } => {
            let config = CliConfig::resolve(session)?;
            commands::plan(&config, *max_steps, &mut out)?;
        }
        Command::Order { session, grid } => {
            let config = CliConfig::resolve(session)?;
            commands::order(&config, *grid, &mut out)?;
        }
        Command::Render {
            session,
            workers,
            pretty,
        } => {
            let config = CliConfig::resolve(session)?;
            commands::render(&config, *workers, *pretty, &mut out)?;
        }
    }
    out.flush().context("flush stdout")
}
