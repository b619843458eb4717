//! Broker tuning knobs.

use std::time::Duration;

/// Default bound on a single service's pending-request queue.
///
/// Resolves spec §9 Open Question 2 ("request-queue bound is not
/// specified by MDPv0.2"): a large but finite bound, drop-oldest on
/// overflow, overridable via `PLANTD_BROKER_MAX_QUEUE`.
pub const DEFAULT_MAX_QUEUE: usize = 10_000;

/// Broker-wide timing and sizing configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Interval between broker<->worker heartbeats and the expiry sweep.
    pub heartbeat_interval: Duration,
    /// Missed intervals of silence from a worker before it's expired.
    pub heartbeat_liveness: u32,
    /// Maximum pending requests held per service before the oldest is dropped.
    pub max_queue: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2500),
            heartbeat_liveness: 3,
            max_queue: DEFAULT_MAX_QUEUE,
        }
    }
}

impl BrokerConfig {
    /// Build configuration from `PLANTD_*` environment variables,
    /// falling back to spec-normative defaults for anything unset or
    /// unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_millis("PLANTD_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = v;
        }
        if let Ok(v) = std::env::var("PLANTD_HEARTBEAT_LIVENESS") {
            if let Ok(parsed) = v.parse() {
                config.heartbeat_liveness = parsed;
            }
        }
        if let Ok(v) = std::env::var("PLANTD_BROKER_MAX_QUEUE") {
            if let Ok(parsed) = v.parse() {
                config.max_queue = parsed;
            }
        }

        config
    }

    /// The age beyond which a worker's silence marks it dead.
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_liveness
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse::<u64>().ok().map(Duration::from_millis)
}
