//! Logging initialization.
//!
//! Log output goes to stderr; stdout is reserved for command output.
//! `RUST_LOG` overrides the configured level when set.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global subscriber.
pub fn init(level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Initialize from the `[logging]` section, with command-line overrides.
pub fn init_from_config(config: &LoggingConfig, verbose_override: bool, json_logs_override: bool) {
    let level = if verbose_override {
        "debug"
    } else {
        config.level.as_str()
    };
    let json_format = json_logs_override || config.format == LogFormat::Json;
    init(level, json_format);
}
