//! Logging setup
//!
//! Console output plus a daily rolling file (`procwatch.log`) in the
//! configured log directory. `RUST_LOG` takes precedence over
//! `LOGGING.level`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "procwatch.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let (file_layer, guard) = match file_writer(&config.dir) {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false) // No color codes in file
                    .with_target(true),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let file_logging_enabled = file_layer.is_some();
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed && file_logging_enabled {
        eprintln!("Logging to: {}/{}", config.dir.display(), LOG_FILE_NAME);
    }

    guard
}

/// Minimal logging for one-shot commands
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn default_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        // Already a full directive
        level.to_string()
    } else {
        format!("{level},sqlx=warn")
    }
}

/// Open the rolling file writer, or `None` if the directory is not writable.
///
/// `tracing_appender::rolling::daily` panics when it cannot create the
/// initial file, so writability is checked up front.
fn file_writer(
    log_dir: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Warning: Could not create log directory {} ({}), file logging disabled",
            log_dir.display(),
            e
        );
        return None;
    }

    let test_path = log_dir.join(".procwatch_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&test_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_path);
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
            Some(tracing_appender::non_blocking(file_appender))
        }
        Err(e) => {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                log_dir.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_level_gets_sqlx_override() {
        assert_eq!(default_directive("debug"), "debug,sqlx=warn");
        assert_eq!(default_directive(" info "), "info,sqlx=warn");
    }

    #[test]
    fn test_full_directive_is_kept() {
        assert_eq!(
            default_directive("info,procwatch=trace"),
            "info,procwatch=trace"
        );
    }

    #[test]
    fn test_unwritable_dir_disables_file_logging() {
        // A path below a regular file can never be created as a directory
        let file = std::env::temp_dir().join(format!("procwatch-log-{}", uuid::Uuid::new_v4()));
        std::fs::write(&file, b"x").unwrap();

        assert!(file_writer(&file.join("logs")).is_none());

        let _ = std::fs::remove_file(&file);
    }
}
