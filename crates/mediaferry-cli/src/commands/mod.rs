//! CLI command definitions and handlers.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use mediaferry_core::transport::TransportKind;

/// Load configuration with graceful fallback to defaults.
///
/// A missing or unparsable config file never stops a command.
pub fn load_config() -> mediaferry_core::config::Config {
    mediaferry_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Using default configuration");
        mediaferry_core::config::Config::default()
    })
}

/// Turn a core error into a CLI error carrying its hint, if any.
pub fn with_hint(err: mediaferry_core::Error) -> anyhow::Error {
    match err.suggestion() {
        Some(hint) => anyhow::anyhow!("{err}\n\n  Hint: {hint}"),
        None => err.into(),
    }
}

pub mod config;
pub mod history;
pub mod pull;
pub mod record;
pub mod serve;
pub mod session;

/// MediaFerry - move photos and videos off a device
#[derive(Parser)]
#[command(name = "mediaferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Serve media files to a browser or a tethered client
    Serve(ServeArgs),

    /// Download everything a line-protocol server offers
    Pull(PullArgs),

    /// View or clear the transfer history
    History(HistoryArgs),

    /// Mark files as transferred without serving them
    Record(RecordArgs),

    /// Inspect the resumable session state
    Session(SessionArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Transport selectable on the command line
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum TransportArg {
    /// Browser-style HTTP server
    #[default]
    Http,
    /// Line protocol for the companion client (resumable)
    Line,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Http => Self::Http,
            TransportArg::Line => Self::Line,
        }
    }
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Files and folders to serve
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Transport to serve over
    #[arg(short, long, value_enum, default_value_t = TransportArg::Http)]
    pub transport: TransportArg,

    /// Port to listen on (defaults to the configured port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Skip files already recorded in the history
    #[arg(short, long)]
    pub incremental: bool,

    /// Include files that are neither images nor videos
    #[arg(long)]
    pub all_files: bool,

    /// Include hidden files
    #[arg(long)]
    pub hidden: bool,

    /// Stop once every file has been served
    #[arg(long)]
    pub until_done: bool,

    /// Delete the source files after a complete transfer
    #[arg(long)]
    pub delete_after: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output the final report in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the pull command
#[derive(Parser)]
pub struct PullArgs {
    /// Host running `mediaferry serve --transport line`
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the line-protocol server (defaults to the configured port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Output directory (defaults to ~/Downloads/MediaFerry)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output the summary in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the history command
#[derive(Parser)]
pub struct HistoryArgs {
    /// Clear history
    #[arg(long)]
    pub clear: bool,

    /// Forget specific files (by path) instead of listing
    #[arg(long, value_name = "PATH")]
    pub forget: Vec<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the record command
#[derive(Parser)]
pub struct RecordArgs {
    /// Files and folders to mark as transferred
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Include files that are neither images nor videos
    #[arg(long)]
    pub all_files: bool,
}

/// Arguments for the session command
#[derive(Parser)]
pub struct SessionArgs {
    /// Drop the current session and the session log
    #[arg(long)]
    pub clear: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
