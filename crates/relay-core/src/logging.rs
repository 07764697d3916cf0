//! Logging initialization using the `tracing` ecosystem.
//!
//! - Console output for the operator, human-readable
//! - Optional file output, one JSON object per line with daily rotation via
//!   `tracing-appender`. This is the audit trail for rejected reads.
//! - Level taken from `RUST_LOG` when set, otherwise from the caller

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::RelayError;

/// Install the global tracing subscriber.
///
/// Call once at program start; a second call fails because a subscriber is
/// already installed.
///
/// # Parameters
///
/// - `log_level`: default filter if `RUST_LOG` is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating JSON log files
/// - `module_name`: log file prefix (e.g. `"relay"`)
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str) -> Result<(), RelayError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(false).with_ansi(true);

    // `Option<Layer>` is itself a layer; `None` adds nothing.
    let file_layer = log_dir.map(|dir| {
        fmt::layer()
            .json()
            .with_writer(tracing_appender::rolling::daily(dir, format!("{module_name}.log")))
            .with_ansi(false)
            .with_current_span(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| RelayError::Config(format!("logging already initialized: {e}")))
}
