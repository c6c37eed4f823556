use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::Verbosity;

#[derive(Debug, Parser)]
#[command(
    name = "satchel",
    version,
    about,
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub verbose: Verbosity,
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Path to the session configuration file [default: built-in defaults]
    #[arg(short, long, global = true, env = "SATCHEL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Use the file store in this directory, overriding the configured store
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Remove expired sessions once
    Gc(GcArgs),
    /// Remove expired sessions periodically until interrupted
    Watch(WatchArgs),
    /// Print the data of a session as JSON
    Show(SessionArgs),
    /// Delete a session
    Destroy(SessionArgs),
    /// Print the number of stored sessions, including expired ones that
    /// have not been collected yet
    Count,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct GcArgs {
    /// Behave as if the host were in maintenance mode (nothing is removed)
    #[arg(long)]
    pub maintenance: bool,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct WatchArgs {
    /// Time between two runs, like `30min` or `1h` [default: the `gc.interval`
    /// configuration value]
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    /// The session identifier
    pub id: String,
}
