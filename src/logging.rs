//! Subscriber setup for the binary.
//!
//! Logs go to stderr so stdout stays parseable for `--json` output.
//! `RUST_LOG` overrides the configured level.

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = filter_for(level);
    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
    };
    if installed.is_ok() {
        debug!(level, %format, "logging initialized");
    }
}
