//! Logging initialization and configuration.
//!
//! Logs are written to files in the configured log directory so they never
//! mix with the JSON the CLI prints on stdout. Each run gets its own file.
//!
//! # Configuration
//!
//! The log level can be controlled via the `RUST_LOG` environment variable:
//! - `RUST_LOG=debug` - Show debug and higher level logs
//! - `RUST_LOG=info` - Show info and higher level logs (default)
//! - `RUST_LOG=warn` - Show warnings and errors only
//!
//! Without `RUST_LOG`, `debug_mode` raises the default from `info` to `debug`.

use std::fs;
use std::path::PathBuf;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Log file prefix.
    pub app_name: String,
    pub log_dir: PathBuf,
    pub debug_mode: bool,
}

impl From<&Settings> for LogSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            app_name: settings.app_name.clone(),
            log_dir: settings.log_dir.clone(),
            debug_mode: settings.debug_mode,
        }
    }
}

impl LogSettings {
    fn default_directive(&self) -> &'static str {
        if self.debug_mode { "debug" } else { "info" }
    }
}

/// Initialize the logging system.
///
/// Each run creates a new log file with a timestamp, e.g.:
/// `logs/shellgate.2026-10-18-14-30-25.log`
///
/// The returned guard flushes the non-blocking writer when dropped; keep it
/// alive until the process exits. Returns `None` (after a warning on stderr)
/// if the log file cannot be created.
pub fn init_logging(settings: &LogSettings) -> Option<WorkerGuard> {
    if let Err(e) = fs::create_dir_all(&settings.log_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        return None;
    }

    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    let log_filename = format!("{}.{}.log", settings.app_name, timestamp);
    let log_path = settings.log_dir.join(&log_filename);

    let log_file = match fs::File::create(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Failed to create log file: {}", e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.default_directive()));

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Warning: Logging already initialized: {}", e);
        return None;
    }

    tracing::info!("Logging initialized - writing to {}", log_path.display());
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_mode_raises_default_level() {
        let mut settings = LogSettings::from(&Settings::default());
        assert_eq!(settings.default_directive(), "info");
        settings.debug_mode = true;
        assert_eq!(settings.default_directive(), "debug");
    }

    #[test]
    fn test_unwritable_log_dir_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let settings = LogSettings {
            app_name: "shellgate".to_string(),
            log_dir: blocker.join("logs"),
            debug_mode: false,
        };
        assert!(init_logging(&settings).is_none());
    }
}
