//! Runtime-agnostic kernel building blocks shared by every fabric crate.
//!
//! - Pinned / `io_uring`-safe allocation ([`alloc`])
//! - Split-pump socket actor ([`actor`])
//! - Multi-peer router hub ([`router`])
//! - Zero-copy segmented read buffer ([`buffer`])
//! - Exponential reconnect backoff ([`reconnect`])
//! - Transport endpoint parsing ([`endpoint`])
//! - Transport configuration ([`options`])
//! - Error taxonomy ([`error`])
//! - TCP socket tuning ([`tcp`])
//!
//! ## Non-goals
//!
//! This crate stays below the wire protocol: framing lives in
//! `plantd-protocol`, and request/reply semantics live in the
//! `plantd-client`/`plantd-worker`/`plantd-broker` endpoint crates.

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_pass_by_ref_mut)]
#![allow(clippy::match_same_arms)]

pub mod actor;
pub mod alloc;
pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod options;
pub mod reconnect;
pub mod router;
pub mod tcp;

/// Small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::actor::{SocketActor, SocketEvent, UserCmd};
    pub use crate::alloc::{IoArena, SlabMut};
    pub use crate::error::{PlantdError, Result};
    pub use crate::options::TransportOptions;
    pub use crate::reconnect::ReconnectState;
    pub use crate::router::{HubEvent, PeerCmd, RouterCmd, RouterHub};
}
