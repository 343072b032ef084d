//! Command-line argument parsing for the text client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Text client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "ap-text-client", about = "Archipelago text client")]
pub struct CliArgs {
    /// Server address (`host:port`).
    #[arg(long)]
    pub server: Option<String>,

    /// Slot name.
    #[arg(long)]
    pub slot: Option<String>,

    /// Game name.
    #[arg(long)]
    pub game: Option<String>,

    /// Room password.
    #[arg(long)]
    pub password: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Retry with backoff when the connection drops.
    #[arg(long)]
    pub reconnect: bool,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.server.address = addr.clone();
        }
        if let Some(ref name) = args.slot {
            self.slot.name = name.clone();
        }
        if let Some(ref game) = args.game {
            self.slot.game = game.clone();
        }
        if let Some(ref password) = args.password {
            self.slot.password = Some(password.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if args.reconnect {
            self.client.reconnect = true;
        }
    }
}
