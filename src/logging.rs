//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter is read from the `TSUMIKI_LOG` environment variable (e.g.
//! `debug` or `tsumiki=trace`) and defaults to `info`. Log lines go through
//! the `tracing-indicatif` writer so they don't tear the progress bars.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "TSUMIKI_LOG";

/// Initialise the global subscriber. Fails if one is already set.
pub fn init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()
}
