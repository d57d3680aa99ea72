//! MediaFerry CLI - move photos and videos off a device
//!
//! The `serve` command exposes a batch of media files over a browser-style
//! HTTP server or over a line protocol meant for a tethered desktop client.
//! `pull` is that desktop client.
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve the camera roll to any browser on the network
//! mediaferry serve ~/DCIM --incremental --until-done
//!
//! # Or serve it over the line protocol and pull it through adb
//! mediaferry serve ~/DCIM --transport line
//! adb forward tcp:12345 tcp:12345
//! mediaferry pull
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::struct_excessive_bools)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Pull(args) => commands::pull::run(args).await,
        Command::History(args) => commands::history::run(&args),
        Command::Record(args) => commands::record::run(&args),
        Command::Session(args) => commands::session::run(&args),
        Command::Config(args) => commands::config::run(&args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,mediaferry=info,mediaferry_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
