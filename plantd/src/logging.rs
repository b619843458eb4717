//! Process-wide tracing setup for the `plantd-broker` binary.
//!
//! Unlike `dev_tracing`'s best-effort, test-only initialization, a
//! deployed broker always installs a subscriber: structured logging is
//! part of the ambient stack operators depend on, not an opt-in.

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` fmt layer filtered by `RUST_LOG`,
/// falling back to `default_level` when the environment variable is
/// unset or fails to parse.
///
/// Returns an error only if a global subscriber is already installed
/// (e.g. in a test harness that also enabled `dev_tracing`).
pub fn init(default_level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
