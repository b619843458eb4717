//! MDPv0.2 broker (spec component C4): worker registry, per-service
//! FIFO request queues, dispatch, liveness tracking, and the `mmi.*`
//! management interface.
//!
//! [`run`] is the facade most callers want: it wires a
//! [`plantd_core::router::RouterHub`] and a
//! [`plantd_net::listener::serve`] accept loop to a [`Broker`]'s
//! dispatch loop and drives all three until a shutdown signal arrives.
//! [`Broker`] itself is exposed for callers who want to embed the
//! registry/dispatch logic in their own loop (tests, alternate
//! transports).

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
mod registry;
mod run;

pub use config::{BrokerConfig, DEFAULT_MAX_QUEUE};
pub use registry::Broker;
pub use run::run;
