use crate::config::parse_bool_flag;
use std::{env, io};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `JOBDASH_LOG_LEVEL`;
/// output is discarded unless `JOBDASH_LOG_STDOUT` is set. Returns false when
/// a subscriber was already installed.
pub fn init_logging() -> bool {
    let level = env::var("JOBDASH_LOG_LEVEL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stdout_enabled = env::var("JOBDASH_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);
    if stdout_enabled {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init()
            .is_ok()
    }
}
