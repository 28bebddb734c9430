mod app;
mod catalog;
mod cli;
mod config;
mod db;
mod http;
mod model;
mod paths;
mod playback;
mod scrape;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);
    app::run(cli)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        format!("{}=debug", env!("CARGO_PKG_NAME"))
    } else {
        format!("{}=warn", env!("CARGO_PKG_NAME"))
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
