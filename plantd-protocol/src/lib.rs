//! MDPv0.2 wire framing and message codec.
//!
//! - [`codec`]: length-prefixed wire frame encode/decode
//! - [`message`]: the typed [`Message`] model and its single
//!   encode/decode path, including the empty-delimiter invariant
//! - [`session`]: sans-IO assembly of frames into messages
//! - [`config`]: buffer sizing knobs
//!
//! This crate has no socket or runtime dependency; `plantd-net` drives
//! a [`session::Session`] with bytes read off a real connection.

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod codec;
pub mod config;
pub mod message;
pub mod session;

pub use message::{Command, Header, Message};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::message::{Command, Header, Message};
    pub use crate::session::{Session, SessionEvent};
}
