//! Tracing/logging initialization for the tunneler binary.
//!
//! Logs go to stderr so that `tunneler show` and friends keep a clean stdout.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the env-filter: `RUST_LOG` wins, otherwise `tunneler_core={level},tunneler={level}`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tunneler_core={level},tunneler={level}")))
}

/// Install the global tracing subscriber.
///
/// * `level` -- default level when `RUST_LOG` is not set (e.g. `"info"`).
/// * `log_json` -- emit structured JSON lines instead of the human format.
///
/// Calling this twice is harmless; the second subscriber is dropped.
pub fn init_tracing(level: &str, log_json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    let result = if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
