//! Supervision overlay (spec component C5): circuit breaking around
//! outbound calls to fabric dependencies, and a health aggregator that
//! rolls up their liveness into one report.
//!
//! Neither piece talks MDPv0.2 directly; both wrap whatever transport
//! the caller already has (typically a [`plantd_client::Client`]),
//! which is why this crate depends on `plantd-client` rather than
//! `plantd-net` or `plantd-protocol` directly.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod circuit_breaker;
mod health;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use health::{
    BrokerProbe, Component, HealthAggregator, HealthReport, Overall, Pingable, SelfProbe, Status, TcpProbe, Trend,
};
