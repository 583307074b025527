use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

const DEFAULT_FILTER: &str = "metric_learner=info";
static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("bad log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("could not install the log subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Sends compact logs to stderr, filtered by `RUST_LOG` or
/// `metric_learner=info` when that is unset or unparseable.
///
/// Stdout is left to the labeling dialogue and command output. Calling it
/// again after a successful install does nothing.
pub fn init_tracing() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)?,
    };
    let logs = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(logs).try_init()?;
    let _ = INSTALLED.set(());
    Ok(())
}

/// Cuts `value` to at most `max_chars` characters, on a char boundary.
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((cutoff, _)) => &value[..cutoff],
        None => value,
    }
}
