//! Configuration for Archipelago clients.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line via clap. Unknown fields are ignored and missing fields fall
//! back to defaults, so older and newer config files both load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, ClientConfig, Config, DebugConfig, ServerConfig, SlotConfig};
pub use error::ConfigError;
