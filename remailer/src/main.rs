#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
mod controller;

use std::path::PathBuf;

use clap::Parser;
use remailer_common::logging;

use crate::controller::Remailer;

/// Store-and-forward mail relay: accepts bursts of mail locally, releases
/// them upstream at a configured minimum interval.
#[derive(Debug, Parser)]
#[command(name = "remailer", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "remailer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args = Args::parse();
    Remailer::from_config(&args.config)?.run().await
}
