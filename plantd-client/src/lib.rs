//! MDPv0.2 client endpoint (spec component C2).
//!
//! [`Client`] is the caller-facing half of the fabric: construct a
//! REQUEST, wait for a matching REPLY, retry with a from-scratch
//! reconnect on timeout. Built on [`plantd_net::Connection`], the
//! reconnecting single-peer transport this crate shares with
//! `plantd-worker`.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod client;

pub use client::{Client, DEFAULT_RETRIES, DEFAULT_TIMEOUT, MMI_SERVICE};
