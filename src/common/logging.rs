//! Logging and tracing configuration
//!
//! The CLI logs compactly to stderr so it never interleaves with command
//! results on stdout. Full DAP traffic goes to a log file through a
//! non-blocking appender when a log location is available.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;

/// Name of the log file inside the log directory
const LOG_FILE: &str = "dap-bridge.log";

/// Handle returned by [`init_cli`]
///
/// Dropping it flushes and stops the background file writer, so `main` keeps
/// it alive for the process lifetime.
pub struct LogHandle {
    pub log_file: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

/// Initialize tracing for the CLI
///
/// Console logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for
/// dependencies. The file layer always records at DEBUG so DAP frames can be
/// inspected after the fact.
pub fn init_cli(verbose: bool, log_file: Option<&Path>) -> LogHandle {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("dap_bridge=debug,warn")
        } else {
            EnvFilter::new("dap_bridge=info,warn")
        }
    });

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(console_filter);

    let target = log_file.map(Path::to_path_buf).or_else(default_log_file);
    let file_writer = target.as_deref().and_then(open_log_file);

    match file_writer {
        Some((file, path)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_filter(EnvFilter::new("dap_bridge=debug,info"));

            // try_init: tests and embedding hosts may already own a subscriber
            let _ = tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .try_init();

            LogHandle {
                log_file: Some(path),
                _guard: Some(guard),
            }
        }
        None => {
            let _ = tracing_subscriber::registry().with(console_layer).try_init();
            LogHandle {
                log_file: None,
                _guard: None,
            }
        }
    }
}

fn default_log_file() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join(LOG_FILE))
}

fn open_log_file(path: &Path) -> Option<(std::fs::File, PathBuf)> {
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return None;
        }
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => Some((file, path.to_path_buf())),
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.log");
        let (_, opened) = open_log_file(&path).unwrap();
        assert_eq!(opened, path);
        assert!(path.exists());
    }
}
