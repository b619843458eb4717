//! TCP transport for the plantd fabric.
//!
//! - [`connection`]: reconnecting single-peer connection for the
//!   client and worker endpoints
//! - [`listener`]: accept loop for the broker's multi-peer side,
//!   feeding a [`plantd_core::router::RouterHub`]
//!
//! Everything here is I/O and wiring; the message model and framing
//! live in `plantd-protocol`, and the actor/hub primitives this crate
//! assembles live in `plantd-core`.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod listener;

pub use connection::Connection;
pub use listener::{bind, serve, serve_on, InboundMessage};
