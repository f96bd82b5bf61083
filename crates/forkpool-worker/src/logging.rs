//! Logging for worker processes.
//!
//! Stdout carries the channel, so logs go to stderr. The level starts from
//! `RUST_LOG` (or `info`) and is replaced by the level sent in `init`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::error::RuntimeError;

/// Handle for changing the log level after the subscriber is installed.
#[derive(Debug, Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Replace the active filter with `level` (any `EnvFilter` directive).
    pub fn set_level(&self, level: &str) -> Result<(), RuntimeError> {
        let filter =
            EnvFilter::try_new(level).map_err(|e| RuntimeError::Logging(e.to_string()))?;
        self.inner
            .reload(filter)
            .map_err(|e| RuntimeError::Logging(e.to_string()))
    }
}

/// Install a global subscriber writing to stderr.
pub fn init_stderr() -> Result<LogLevelHandle, RuntimeError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, inner) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| RuntimeError::Logging(e.to_string()))?;

    Ok(LogLevelHandle { inner })
}
