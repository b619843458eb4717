//! MDPv0.2 worker endpoint (spec component C3).
//!
//! [`Worker`] drives the `Connecting -> Idle <-> Serving` state
//! machine over a [`plantd_net::Connection`], with heartbeating and
//! exponential-backoff reconnection built in. The user supplies only a
//! `handler: Fn(Vec<Bytes>) -> Vec<Bytes>`.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod worker;

pub use worker::{Worker, WorkerConfig, WorkerState};
