//! File logging for the analyze and report binaries.
//!
//! Each run appends to `deltalens.<yyyy-mm-dd>.log` under [`Config::state_dir`].
//! `RUST_LOG` overrides the configured level when set.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_PREFIX: &str = "deltalens";

/// Flushes buffered log lines when dropped. Hold it for the life of `main`.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let dir = Config::state_dir();
    let appender = daily_appender(&dir, config.max_files)?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let records = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    // Keeps whichever subscriber was installed first.
    let _ = tracing_subscriber::registry()
        .with(level_filter(&config.level))
        .with(records)
        .try_init();

    tracing::info!(dir = %dir.display(), level = %config.level, "logging to file");
    Ok(LoggingGuard { _worker: worker })
}

fn daily_appender(dir: &Path, max_files: usize) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log directory {}: {e}", dir.display())))
}

/// `RUST_LOG` first, then the configured directive, then `info`.
fn level_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_daily_appender_creates_prefixed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        let mut appender = daily_appender(&dir, 0).unwrap();
        appender.write_all(b"line\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("deltalens."));
        assert!(names[0].ends_with(".log"));
    }

    #[test]
    fn test_level_filter_accepts_directives() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(level_filter("debug").to_string(), "debug");
        assert_eq!(level_filter("deltalens_core=trace").to_string(), "deltalens_core=trace");
    }
}
