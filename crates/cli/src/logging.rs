//! File-based logging for the relay host.
//!
//! Logs are written to `~/.local/state/camrelay/relay.log` using a daily
//! rolling file appender. Stderr output is enabled when `RUST_LOG` is set or
//! `--verbose` is passed. Stdout is left for `--check` output.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The directory under the platform state directory where logs are stored.
const LOG_DIR_NAME: &str = "camrelay";

/// The base filename for the rolling log file.
const LOG_FILE_NAME: &str = "relay.log";

/// Initialise the tracing subscriber with file + optional stderr layers.
///
/// Returns a [`WorkerGuard`] that **must** be held for the lifetime of the
/// program; dropping it flushes and closes the log file writer.
pub fn init_logging(verbose: bool) -> WorkerGuard {
    let log_dir = log_directory();

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "warning: could not create log directory {}: {e}",
            log_dir.display()
        );
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let env_set = std::env::var("RUST_LOG").is_ok();
    let stderr_layer = (env_set || verbose).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    guard
}

/// Filter used when `RUST_LOG` is unset. Tokio internals stay at `warn`
/// either way.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "debug,tokio=warn"
    } else {
        "info,tokio=warn"
    }
}

/// Resolve the log directory path.
///
/// Uses `dirs::state_dir()` where the platform has one and falls back to
/// `~/.local/state/camrelay/`, then the current directory.
fn log_directory() -> PathBuf {
    if let Some(state) = dirs::state_dir() {
        return state.join(LOG_DIR_NAME);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("state").join(LOG_DIR_NAME);
    }
    PathBuf::from(".")
}
