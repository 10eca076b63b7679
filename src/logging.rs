//! Diagnostic logging setup

use crate::config::{LogFormat, LoggingSettings};
use crate::{Result, SocketLogError};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter used with `--verbose`
pub const VERBOSE_FILTER: &str = "socketlog=debug,info";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Output goes to stderr unless a
/// log file is configured, which is the only useful sink once daemonized.
pub fn init(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        VERBOSE_FILTER
    } else {
        settings.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let writer = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    SocketLogError::Config(format!(
                        "Failed to open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(settings.file.is_none())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    installed.map_err(|e| {
        SocketLogError::Config(format!("Failed to set tracing subscriber: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unwritable_log_file_is_reported() {
        let settings = LoggingSettings {
            file: Some("/nonexistent-dir/socketlog.log".into()),
            ..Default::default()
        };
        assert!(matches!(
            init(&settings, false),
            Err(SocketLogError::Config(_))
        ));
    }

    #[test]
    fn test_second_install_fails_without_panicking() {
        let temp_dir = tempdir().unwrap();
        let settings = LoggingSettings {
            file: Some(temp_dir.path().join("diag.log")),
            format: LogFormat::Json,
            ..Default::default()
        };

        // Only one global subscriber can exist per process
        let _ = init(&settings, true);
        assert!(matches!(
            init(&settings, true),
            Err(SocketLogError::Config(_))
        ));
    }
}
