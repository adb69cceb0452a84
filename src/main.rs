mod app;
mod classify;
mod config;
mod data;
mod error;
mod features;
mod plot;

use clap::Parser;
use env_logger::Env;

use config::{Cli, RunConfig};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = RunConfig::from_cli(Cli::parse())?;
    if let Err(err) = app::run(&config) {
        log::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}
