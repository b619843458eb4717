//! Health aggregation across a fixed set of dependencies.
//!
//! [`HealthAggregator`] fans a probe out to every registered
//! [`Pingable`] dependency concurrently, each bounded by its own
//! per-component timeout strictly smaller than the aggregator's own
//! `aggregate_timeout`, and isolated from a panicking probe via
//! `catch_unwind` the same way `plantd-worker` isolates a panicking
//! request handler. Results roll into a bounded history per component
//! so trend (`improving` / `stable` / `degrading`) can be read back
//! without re-probing.

#![allow(clippy::needless_return)]

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;

/// Something the aggregator can probe for liveness.
///
/// Implemented directly by concrete dependency probes (a broker MMI
/// round trip, a bare TCP connect, an always-healthy sentinel); the
/// aggregator never knows which.
#[async_trait]
pub trait Pingable: Send + Sync {
    /// Stable name this dependency is reported under.
    fn name(&self) -> &str;

    /// Attempt one liveness probe. `Err` marks this round unhealthy;
    /// a panic inside the implementation is also treated as a failure
    /// by the aggregator, not propagated.
    async fn ping(&self) -> Result<(), String>;
}

/// A single dependency's health as of its most recent probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The most recent probe succeeded comfortably within its timeout.
    Healthy,
    /// The most recent probe succeeded but used more than half its
    /// allotted timeout.
    Degraded,
    /// The most recent probe failed, timed out, or panicked.
    Unhealthy,
}

/// Direction a component's recent history is trending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    /// More recent checks are healthy than the window's earlier half.
    Improving,
    /// No material change across the window.
    Stable,
    /// More recent checks are unhealthy than the window's earlier half.
    Degrading,
}

/// One probe outcome, kept in a component's rolling history.
#[derive(Debug, Clone, Copy)]
struct Sample {
    status: Status,
    latency: Duration,
}

/// A dependency's current status plus enough rolling history to
/// classify its trend.
#[derive(Debug, Clone)]
pub struct Component {
    /// Name this dependency was registered under.
    pub name: String,
    /// Outcome of the most recent probe.
    pub status: Status,
    /// Latency of the most recent probe (wall-clock, including any
    /// time spent waiting on the per-component timeout).
    pub latency: Duration,
    /// When the most recent probe completed.
    pub last_check: Instant,
    /// Consecutive failures immediately preceding (and including, if
    /// unhealthy) the most recent probe.
    pub consecutive_failures: u32,
    /// Fraction of samples in the rolling history that were healthy.
    pub success_rate: f64,
}

/// Registered dependency: its probe, timeout, and rolling history.
/// Held behind an `Arc` so a `check` round can clone the registry
/// table once under lock and then poll every probe without holding
/// anything across an `.await`.
struct Entry {
    probe: Box<dyn Pingable>,
    timeout: Duration,
    history: Mutex<VecDeque<Sample>>,
    consecutive_failures: AtomicU32,
}

/// Aggregate classification across every registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overall {
    /// No component reported unhealthy or degraded.
    Healthy,
    /// At least one component unhealthy or degraded, but fewer than
    /// half of all components are unhealthy.
    Degraded,
    /// At least half of all components are unhealthy.
    Unhealthy,
    /// No dependencies are registered, so nothing could be evaluated.
    Unknown,
}

/// One full aggregation round: every component's status plus the
/// overall classification.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Per-component results, in registration order.
    pub components: Vec<Component>,
    /// Aggregate classification derived from `components`.
    pub overall: Overall,
}

const DEFAULT_HISTORY_SIZE: usize = 100;

/// Fans a liveness probe out to every registered dependency.
pub struct HealthAggregator {
    entries: Mutex<Vec<Arc<Entry>>>,
    aggregate_timeout: Duration,
    history_size: usize,
}

impl HealthAggregator {
    /// Construct an aggregator whose overall `check` is itself bounded
    /// by `aggregate_timeout`. Every component registered afterwards
    /// must use a per-probe timeout strictly smaller than this value --
    /// [`HealthAggregator::register`] panics otherwise, since a
    /// component that can outlive the aggregate deadline makes the
    /// aggregate timeout meaningless.
    #[must_use]
    pub fn new(aggregate_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            aggregate_timeout,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }

    /// Override the rolling history length kept per component
    /// (default 100 samples).
    #[must_use]
    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    /// Register a dependency, probed no longer than `timeout` per round.
    ///
    /// # Panics
    /// Panics if `timeout >= aggregate_timeout` -- this is a
    /// configuration error, not a runtime condition, so it is caught
    /// at registration rather than silently truncating every round.
    pub fn register(&self, probe: impl Pingable + 'static, timeout: Duration) {
        assert!(
            timeout < self.aggregate_timeout,
            "component timeout must be strictly less than the aggregate timeout"
        );
        self.entries.lock().push(Arc::new(Entry {
            probe: Box::new(probe),
            timeout,
            history: Mutex::new(VecDeque::with_capacity(self.history_size.min(64))),
            consecutive_failures: AtomicU32::new(0),
        }));
    }

    /// Run one round: probe every component concurrently, each
    /// independently bounded by its own timeout, the whole round
    /// additionally bounded by `aggregate_timeout`.
    pub async fn check(&self) -> HealthReport {
        let entries: Vec<Arc<Entry>> = self.entries.lock().clone();

        let probes = entries.iter().map(|entry| probe_one(Arc::clone(entry)));
        let outcome = compio::time::timeout(self.aggregate_timeout, join_all(probes)).await;

        let samples = match outcome {
            Ok(samples) => samples,
            Err(_) => {
                tracing::warn!("health aggregate round exceeded its own timeout");
                entries
                    .iter()
                    .map(|entry| (Status::Unhealthy, entry.timeout, entry.clone()))
                    .collect()
            }
        };

        self.fold_report(samples)
    }

    fn fold_report(&self, samples: Vec<(Status, Duration, Arc<Entry>)>) -> HealthReport {
        let mut components = Vec::with_capacity(samples.len());

        for (status, latency, entry) in samples {
            let consecutive_failures = match status {
                Status::Healthy | Status::Degraded => {
                    entry.consecutive_failures.store(0, Ordering::SeqCst);
                    0
                }
                Status::Unhealthy => entry.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1,
            };

            let mut history = entry.history.lock();
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(Sample { status, latency });
            let success_rate = success_rate(&history);
            drop(history);

            components.push(Component {
                name: entry.probe.name().to_string(),
                status,
                latency,
                last_check: Instant::now(),
                consecutive_failures,
                success_rate,
            });
        }

        let overall = classify(&components);
        HealthReport { components, overall }
    }

    /// Trend of `name`'s recent history: compares the healthy fraction
    /// of the newer half of the rolling window against the older half.
    /// Returns `None` if the component is unknown or has fewer than two
    /// samples.
    #[must_use]
    pub fn trend(&self, name: &str) -> Option<Trend> {
        let entries = self.entries.lock();
        let entry = entries.iter().find(|e| e.probe.name() == name)?;
        let history = entry.history.lock();
        if history.len() < 2 {
            return None;
        }

        let samples: Vec<Sample> = history.iter().copied().collect();
        let mid = samples.len() / 2;
        let (first_half, second_half) = samples.split_at(mid);

        let rate = |samples: &[Sample]| -> f64 {
            if samples.is_empty() {
                return 0.0;
            }
            let healthy = samples.iter().filter(|s| s.status != Status::Unhealthy).count();
            healthy as f64 / samples.len() as f64
        };

        let before = rate(first_half);
        let after = rate(second_half);

        Some(if after > before {
            Trend::Improving
        } else if after < before {
            Trend::Degrading
        } else {
            Trend::Stable
        })
    }
}

/// Probe one component, isolated from both a timeout and a panic
/// inside the probe's `ping` implementation.
async fn probe_one(entry: Arc<Entry>) -> (Status, Duration, Arc<Entry>) {
    let started = Instant::now();

    let outcome = compio::time::timeout(entry.timeout, AssertUnwindSafe(entry.probe.ping()).catch_unwind()).await;

    let latency = started.elapsed();
    let status = match outcome {
        Ok(Ok(Ok(()))) => {
            if latency > entry.timeout / 2 {
                Status::Degraded
            } else {
                Status::Healthy
            }
        }
        Ok(Ok(Err(reason))) => {
            tracing::debug!(name = entry.probe.name(), %reason, "dependency probe reported unhealthy");
            Status::Unhealthy
        }
        Ok(Err(_panic)) => {
            tracing::warn!(name = entry.probe.name(), "dependency probe panicked; treating as unhealthy");
            Status::Unhealthy
        }
        Err(_elapsed) => {
            tracing::debug!(name = entry.probe.name(), timeout = ?entry.timeout, "dependency probe timed out");
            Status::Unhealthy
        }
    };

    (status, latency, entry)
}

/// Fraction of history that did not outright fail; `Degraded` counts as
/// a success here (the dependency answered, just slowly) -- only
/// `Unhealthy` samples count against the rate.
fn success_rate(history: &VecDeque<Sample>) -> f64 {
    if history.is_empty() {
        return 1.0;
    }
    let successes = history.iter().filter(|s| s.status != Status::Unhealthy).count();
    successes as f64 / history.len() as f64
}

/// Spec §4.5's exact aggregation rule: unhealthy if at least half the
/// components are unhealthy, degraded if any component is unhealthy or
/// degraded, healthy otherwise, unknown if nothing is registered.
fn classify(components: &[Component]) -> Overall {
    if components.is_empty() {
        return Overall::Unknown;
    }
    let unhealthy = components.iter().filter(|c| c.status == Status::Unhealthy).count();
    let degraded = components.iter().filter(|c| c.status == Status::Degraded).count();

    if unhealthy * 2 >= components.len() {
        Overall::Unhealthy
    } else if unhealthy > 0 || degraded > 0 {
        Overall::Degraded
    } else {
        Overall::Healthy
    }
}

/// Always-healthy sentinel probe, useful as a baseline "is the
/// aggregator itself running" component.
pub struct SelfProbe;

#[async_trait]
impl Pingable for SelfProbe {
    fn name(&self) -> &str {
        "self"
    }

    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Probes a dependency by holding one long-lived TCP connection open
/// and re-using it every round, for dependencies that don't speak
/// MDPv0.2 themselves (e.g. a state store or identity service sitting
/// behind a plain port).
///
/// Per spec §9(b)/(c) ("use a long-lived shared socket with bounded
/// in-flight probes ... never create a new socket per probe"): the
/// connection is established lazily on first use and kept in
/// `conn`, not reopened every round. A round takes the connection out
/// of the mutex before the `.await` that exercises it (never holding
/// the lock across an await point, which would stall every other task
/// on this probe's single-threaded runtime) and only puts it back on
/// success; a failed round drops the broken connection so the next
/// round reconnects exactly once.
pub struct TcpProbe {
    name: String,
    addr: std::net::SocketAddr,
    conn: Mutex<Option<compio::net::TcpStream>>,
}

impl TcpProbe {
    /// Construct a probe that will connect to `addr` on first use and
    /// keep that connection open across subsequent rounds.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: std::net::SocketAddr) -> Self {
        Self { name: name.into(), addr, conn: Mutex::new(None) }
    }
}

#[async_trait]
impl Pingable for TcpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<(), String> {
        use compio::buf::BufResult;
        use compio::io::AsyncWriteExt;

        let mut stream = match self.conn.lock().take() {
            Some(stream) => stream,
            None => compio::net::TcpStream::connect(self.addr)
                .await
                .map_err(|err| err.to_string())?,
        };

        let BufResult(res, _) = stream.write_all(Vec::new()).await;
        match res {
            Ok(()) => {
                *self.conn.lock() = Some(stream);
                Ok(())
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

/// Probes a broker by round-tripping its `mmi.service` management
/// query for a sentinel service name -- any reply (200 or 404) proves
/// the broker's dispatch loop is alive; only a connect failure or
/// timeout marks it unhealthy.
///
/// Holds one long-lived `plantd_client::Client` behind a mutex instead
/// of reconnecting per probe, for the same reason as [`TcpProbe`].
pub struct BrokerProbe {
    name: String,
    addr: std::net::SocketAddr,
    client: Mutex<Option<plantd_client::Client>>,
}

impl BrokerProbe {
    /// Construct a probe against the broker listening at `addr`. The
    /// client connection is established lazily on the first `ping`.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: std::net::SocketAddr) -> Self {
        Self { name: name.into(), addr, client: Mutex::new(None) }
    }
}

#[async_trait]
impl Pingable for BrokerProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<(), String> {
        let mut client = match self.client.lock().take() {
            Some(client) => client,
            None => {
                let mut client = plantd_client::Client::connect(self.addr)
                    .await
                    .map_err(|err| err.to_string())?;
                client.set_retries(0);
                client
            }
        };

        match client.lookup_service("mmi.health-probe-sentinel").await {
            Ok(_) => {
                *self.client.lock() = Some(client);
                Ok(())
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyProbe {
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Pingable for FlakyProbe {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn ping(&self) -> Result<(), String> {
            if self.fail.load(Ordering::SeqCst) {
                Err("forced failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct PanickyProbe;

    #[async_trait]
    impl Pingable for PanickyProbe {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn ping(&self) -> Result<(), String> {
            panic!("probe exploded")
        }
    }

    struct SlowProbe;

    #[async_trait]
    impl Pingable for SlowProbe {
        fn name(&self) -> &str {
            "slow"
        }

        async fn ping(&self) -> Result<(), String> {
            compio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    #[compio::test]
    async fn all_healthy_reports_overall_healthy() {
        let aggregator = HealthAggregator::new(Duration::from_millis(200));
        aggregator.register(SelfProbe, Duration::from_millis(50));

        let report = aggregator.check().await;
        assert_eq!(report.overall, Overall::Healthy);
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.components[0].status, Status::Healthy);
    }

    #[compio::test]
    async fn one_unhealthy_dependency_among_many_degrades_not_fails_everything() {
        // Spec's rule is "unhealthy if unhealthy count >= half of components" --
        // one failure out of three stays under that bar and reports Degraded.
        let aggregator = HealthAggregator::new(Duration::from_millis(200));
        aggregator.register(SelfProbe, Duration::from_millis(50));
        aggregator.register(SelfProbe, Duration::from_millis(50));
        aggregator.register(
            FlakyProbe { fail: std::sync::atomic::AtomicBool::new(true) },
            Duration::from_millis(50),
        );

        let report = aggregator.check().await;
        assert_eq!(report.overall, Overall::Degraded);
    }

    #[compio::test]
    async fn half_unhealthy_reports_overall_unhealthy() {
        let aggregator = HealthAggregator::new(Duration::from_millis(200));
        aggregator.register(SelfProbe, Duration::from_millis(50));
        aggregator.register(
            FlakyProbe { fail: std::sync::atomic::AtomicBool::new(true) },
            Duration::from_millis(50),
        );

        let report = aggregator.check().await;
        assert_eq!(report.overall, Overall::Unhealthy);
    }

    #[compio::test]
    async fn zero_components_reports_unknown() {
        let aggregator = HealthAggregator::new(Duration::from_millis(200));
        let report = aggregator.check().await;
        assert_eq!(report.overall, Overall::Unknown);
        assert!(report.components.is_empty());
    }

    #[compio::test]
    async fn panicking_probe_is_isolated_and_marked_unhealthy() {
        let aggregator = HealthAggregator::new(Duration::from_millis(200));
        aggregator.register(PanickyProbe, Duration::from_millis(50));

        let report = aggregator.check().await;
        assert_eq!(report.overall, Overall::Unhealthy);
        assert_eq!(report.components[0].status, Status::Unhealthy);
    }

    #[compio::test]
    async fn slow_probe_is_bounded_by_its_own_timeout_not_the_aggregate() {
        let aggregator = HealthAggregator::new(Duration::from_millis(500));
        aggregator.register(SlowProbe, Duration::from_millis(30));

        let started = Instant::now();
        let report = aggregator.check().await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(report.components[0].status, Status::Unhealthy);
    }

    #[test]
    #[should_panic(expected = "strictly less than")]
    fn registering_with_timeout_at_or_above_aggregate_panics() {
        let aggregator = HealthAggregator::new(Duration::from_millis(100));
        aggregator.register(SelfProbe, Duration::from_millis(100));
    }

    #[compio::test]
    async fn trend_reflects_recent_improvement() {
        let aggregator = HealthAggregator::new(Duration::from_millis(200));
        let shared = Arc::new(FlakyProbe { fail: std::sync::atomic::AtomicBool::new(true) });

        struct SharedFlaky(Arc<FlakyProbe>);
        #[async_trait]
        impl Pingable for SharedFlaky {
            fn name(&self) -> &str {
                "shared-flaky"
            }
            async fn ping(&self) -> Result<(), String> {
                self.0.ping().await
            }
        }

        aggregator.register(SharedFlaky(shared.clone()), Duration::from_millis(50));

        for _ in 0..4 {
            let _ = aggregator.check().await;
        }
        shared.fail.store(false, Ordering::SeqCst);
        for _ in 0..4 {
            let _ = aggregator.check().await;
        }

        assert_eq!(aggregator.trend("shared-flaky"), Some(Trend::Improving));
    }
}
