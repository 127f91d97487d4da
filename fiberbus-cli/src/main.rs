//! ## fiberbus-cli
//! **Command line front end for the simulated event bus**
//!
//! - `simulate`: run a YAML scenario and print its trace hash
//! - `generate`: write a seeded random scenario
//! - `fuzz`: run generated scenarios twice each and compare hashes

use anyhow::Context;
use clap::Parser;
use fiberbus_config::FiberbusConfig;
use fiberbus_telemetry::BusLogger;

mod commands;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FiberbusConfig::load_from_path(path),
        None => FiberbusConfig::load(),
    }
    .context("loading configuration")?;

    BusLogger::init(&config.telemetry.log_level)?;
    commands::run_command(cli, config)
}
