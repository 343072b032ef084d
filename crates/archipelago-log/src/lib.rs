//! Structured logging for Archipelago clients.
//!
//! Console output with timestamps and targets, plus optional JSON file
//! logging for post-mortem analysis of a session. The filter comes from
//! `RUST_LOG` when set, otherwise from the config's `log_level`.

use std::path::Path;

use archipelago_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn";

/// Name of the JSON log file written into the log directory.
pub const LOG_FILE: &str = "archipelago-client.log";

/// Initialize the global tracing subscriber.
///
/// `config.debug.log_dir`, when set, adds a JSON layer writing to
/// [`LOG_FILE`] inside that directory. Failing to create the file only
/// disables the file layer.
pub fn init_logging(config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(config));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(log_dir) = config.and_then(|c| c.debug.log_dir.as_deref())
        && let Some(log_file) = open_log_file(log_dir)
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Build the filter for `config`, falling back to [`DEFAULT_FILTER`].
pub fn filter_for(config: Option<&Config>) -> EnvFilter {
    match config.map(|c| c.debug.log_level.as_str()) {
        Some(level) if !level.is_empty() => EnvFilter::new(level),
        _ => default_env_filter(),
    }
}

/// The default filter: `info` everywhere, websocket internals at `warn`.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

fn open_log_file(log_dir: &Path) -> Option<std::fs::File> {
    std::fs::create_dir_all(log_dir).ok()?;
    std::fs::File::create(log_dir.join(LOG_FILE)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter_str = default_env_filter().to_string();
        assert!(filter_str.contains("tungstenite=warn"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_config_level_used() {
        let mut config = Config::default();
        config.debug.log_level = "debug,archipelago_client=trace".to_string();
        let filter_str = filter_for(Some(&config)).to_string();
        assert!(filter_str.contains("archipelago_client=trace"));
    }

    #[test]
    fn test_default_config_uses_default_filter() {
        assert_eq!(
            filter_for(Some(&Config::default())).to_string(),
            default_env_filter().to_string()
        );
    }

    #[test]
    fn test_empty_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_ne!(
            filter_for(Some(&config)).to_string(),
            default_env_filter().to_string()
        );
        config.debug.log_level.clear();
        assert_eq!(
            filter_for(Some(&config)).to_string(),
            default_env_filter().to_string()
        );
        assert_eq!(
            filter_for(None).to_string(),
            default_env_filter().to_string()
        );
    }

    #[test]
    fn test_env_filter_parsing() {
        for filter_str in [
            "info",
            "debug,archipelago_client=trace",
            "warn,archipelago_client::connection=debug",
            "error",
        ] {
            assert!(EnvFilter::try_new(filter_str).is_ok(), "{filter_str}");
        }
    }

    #[test]
    fn test_log_file_created_in_nested_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_dir = temp_dir.path().join("logs");
        assert!(open_log_file(&log_dir).is_some());
        assert!(log_dir.join(LOG_FILE).exists());
    }
}
