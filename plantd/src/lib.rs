//! # plantd
//!
//! The `plantd` fabric: a Majordomo Protocol v0.2 (MDPv0.2) message
//! broker, client, and worker, plus a supervision overlay for
//! circuit-breaking and health aggregation across dependencies.
//!
//! ## Architecture
//!
//! The fabric is structured as a small set of focused crates, all
//! re-exported here:
//!
//! - [`plantd_protocol`]: sans-IO framing and the `Message` codec (C1)
//! - [`plantd_net`]: TCP transport -- a reconnecting single-peer
//!   `Connection` for endpoints, and a multi-peer accept loop for the broker
//! - [`plantd_client`]: the request/reply caller endpoint (C2)
//! - [`plantd_worker`]: the service-implementing endpoint (C3)
//! - [`plantd_broker`]: worker registry, dispatch, liveness, and MMI (C4)
//! - [`plantd_supervision`]: circuit breaker and health aggregator (C5)
//!
//! `plantd-core` supplies the shared kernel underneath all of them
//! (actor/socket plumbing, the router hub, transport options, and the
//! error taxonomy) and is re-exported as [`core`] for callers who need
//! to reach it directly.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use plantd::{Client, Worker, WorkerConfig};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr = "127.0.0.1:9797".parse()?;
//!
//! // A worker registers for a service and answers requests.
//! let mut worker = Worker::new(addr, "echo", WorkerConfig::default());
//! compio::runtime::spawn(async move {
//!     let _ = worker.serve(|payload| payload).await;
//! })
//! .detach();
//!
//! // A client sends a request and waits for the matching reply.
//! let mut client = Client::connect(addr).await?;
//! let reply = client.send("echo", vec![Bytes::from_static(b"hi")]).await?;
//! assert_eq!(reply, vec![Bytes::from_static(b"hi")]);
//! # Ok(())
//! # }
//! ```
//!
//! Running the broker itself is normally done through the
//! `plantd-broker` binary shipped alongside this crate, not by calling
//! [`plantd_broker::run`] directly -- but library embedders are free to
//! do so.
//!
//! ## Safety
//!
//! `unsafe` is forbidden in every crate of this fabric
//! (`#![deny(unsafe_code)]`); all framing, routing, and transport logic
//! is ordinary safe Rust built on `compio` and `flume`.

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow some pedantic patterns
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)] // Runtime-agnostic design
#![allow(clippy::missing_errors_doc)] // Will add gradually
#![allow(clippy::doc_markdown)] // Too many false positives

// Re-export the shared kernel for callers reaching past the endpoint crates.
pub use plantd_core as core;
pub use plantd_protocol as protocol;

pub use bytes::Bytes;
pub use plantd_broker::{BrokerConfig, DEFAULT_MAX_QUEUE};
pub use plantd_client::{Client, DEFAULT_RETRIES, DEFAULT_TIMEOUT, MMI_SERVICE};
pub use plantd_core::error::PlantdError;
pub use plantd_core::options::TransportOptions;
pub use plantd_supervision::{CircuitBreaker, CircuitState, HealthAggregator, Overall, Pingable, Status};
pub use plantd_worker::{Worker, WorkerConfig, WorkerState};

/// `plantd-broker` process configuration (CLI flags and their
/// `PLANTD_*` environment fallbacks).
pub mod config;
/// Development helper for installing a best-effort tracing subscriber
/// in tests and benches.
pub mod dev_tracing;
/// Always-on tracing setup used by the `plantd-broker` binary.
pub mod logging;
