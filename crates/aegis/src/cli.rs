//! Command-line arguments.
//!
//! Flags only override what the config file already expresses; anything
//! structural (servers, databases) lives in the TOML file.

use clap::Parser;
use std::path::PathBuf;

/// Administration and observability platform for game server fleets.
#[derive(Debug, Clone, Parser)]
#[command(name = "aegis", version, about)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Feeds WebSocket bind address (e.g. 127.0.0.1:8090)
    #[arg(long, value_name = "ADDRESS")]
    pub feeds_bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Run without a database; all state is lost on exit
    #[arg(long)]
    pub in_memory: bool,
}
