//! Wire framing: length-prefixed frame codec shared by every fabric peer.
//!
//! Every logical multipart message is encoded as a sequence of these
//! frames. Each frame is one flags byte (bit 0 = MORE, bit 1 = LONG
//! length) followed by a 1-byte or 8-byte big-endian length and the
//! payload. This is the single encoder/decoder pair used by the
//! client, worker, and broker endpoints -- frames are never hand-built
//! anywhere else in the fabric, which is what keeps the empty-delimiter
//! frame from ever being forgotten or duplicated.

use bytes::{Buf, Bytes, BytesMut};
use plantd_core::buffer::SegmentedBuffer;
use std::io;
use thiserror::Error;

use crate::config::STAGING_BUF_INITIAL_CAP;

/// Wire codec errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Not enough bytes were available to decode a full frame.
    #[error("incomplete frame")]
    Incomplete,

    /// A reserved flag bit was set.
    #[error("protocol violation: reserved bits set")]
    ReservedBits,

    /// The declared frame length exceeded the protocol's sanity limit.
    #[error("protocol violation: frame size too large")]
    SizeTooLarge,

    /// Any other framing violation.
    #[error("protocol violation")]
    Protocol,
}

impl From<WireError> for io::Error {
    fn from(err: WireError) -> Self {
        Self::new(io::ErrorKind::InvalidData, err)
    }
}

/// Result type alias for wire codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// A single decoded wire frame.
#[derive(Debug, Clone)]
pub struct WireFrame {
    /// Flags byte (bit 0: MORE follows, bit 1: long length encoding).
    pub flags: u8,
    /// Frame payload.
    pub payload: Bytes,
}

impl WireFrame {
    /// Whether another frame belonging to the same logical message follows.
    #[inline]
    pub const fn more(&self) -> bool {
        (self.flags & 0x01) != 0
    }

    /// Build a frame, setting the MORE bit when `more` is true and the
    /// LONG bit automatically when the payload exceeds 255 bytes.
    pub const fn new(payload: Bytes, more: bool) -> Self {
        let mut flags = 0;
        if more {
            flags |= 0x01;
        }
        if payload.len() > 255 {
            flags |= 0x02;
        }
        Self { flags, payload }
    }

    /// Encode this single frame to bytes.
    pub fn encode(&self) -> Bytes {
        let is_long = (self.flags & 0x02) != 0;
        let body_len = self.payload.len();

        let mut out = BytesMut::with_capacity(if is_long { 9 } else { 2 } + body_len);
        out.extend_from_slice(&[self.flags]);
        if is_long {
            out.extend_from_slice(&(body_len as u64).to_be_bytes());
        } else {
            out.extend_from_slice(&[body_len as u8]);
        }
        out.extend_from_slice(&self.payload);
        out.freeze()
    }
}

/// Stateful wire-frame decoder.
///
/// Fast path: the entire frame is already buffered, so the payload is
/// sliced out with zero copies. Slow path: the frame is fragmented
/// across reads, so the decoder reassembles it into a staging buffer
/// until the declared length is satisfied.
pub struct FrameDecoder {
    pending_flags: Option<u8>,
    expected_body_len: usize,
    staging: BytesMut,
    max_msg_size: Option<usize>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Construct a decoder with no maximum frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending_flags: None,
            expected_body_len: 0,
            staging: BytesMut::with_capacity(STAGING_BUF_INITIAL_CAP),
            max_msg_size: None,
        }
    }

    /// Construct a decoder that rejects any single frame whose declared
    /// length exceeds `max`.
    #[must_use]
    pub fn with_max_msg_size(max: usize) -> Self {
        Self {
            max_msg_size: Some(max),
            ..Self::new()
        }
    }

    /// Whether the decoder is mid-reassembly of a fragmented frame.
    #[inline]
    pub const fn has_pending(&self) -> bool {
        self.pending_flags.is_some()
    }

    /// Decode a single frame from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, not when the
    /// connection should be treated as closed -- callers should keep
    /// calling as more bytes arrive.
    pub fn decode(&mut self, src: &mut SegmentedBuffer) -> Result<Option<WireFrame>> {
        if let Some(flags) = self.pending_flags {
            let needed = self.expected_body_len - self.staging.len();
            let take = needed.min(src.len());
            if let Some(bytes) = src.take_bytes(take) {
                self.staging.extend_from_slice(&bytes);
            }

            if self.staging.len() < self.expected_body_len {
                return Ok(None);
            }

            let payload = self.staging.split().freeze();
            self.pending_flags = None;
            self.expected_body_len = 0;

            return Ok(Some(WireFrame { flags, payload }));
        }

        if src.len() < 2 {
            return Ok(None);
        }

        let mut hdr = [0u8; 9];
        if !src.copy_prefix(2, &mut hdr) {
            return Ok(None);
        }

        let flags = hdr[0];
        if (flags & 0xFC) != 0 {
            return Err(WireError::ReservedBits);
        }

        let is_long = (flags & 0x02) != 0;
        let header_len = if is_long { 9 } else { 2 };

        if src.len() < header_len {
            return Ok(None);
        }

        let body_len = if is_long {
            if !src.copy_prefix(9, &mut hdr) {
                return Ok(None);
            }
            let mut buf = &hdr[1..9];
            let size = buf.get_u64();
            if size > 0x7FFF_FFFF_FFFF_FFFF {
                return Err(WireError::SizeTooLarge);
            }
            size as usize
        } else {
            hdr[1] as usize
        };

        if let Some(max) = self.max_msg_size {
            if body_len > max {
                return Err(WireError::SizeTooLarge);
            }
        }

        let total_len = header_len + body_len;

        if src.len() >= total_len {
            src.advance(header_len);
            let payload = src
                .take_bytes(body_len)
                .expect("len check ensures body is available");
            return Ok(Some(WireFrame { flags, payload }));
        }

        src.advance(header_len);
        self.pending_flags = Some(flags);
        self.expected_body_len = body_len;
        self.staging.clear();

        let available = src.len().min(body_len);
        if let Some(bytes) = src.take_bytes(available) {
            self.staging.extend_from_slice(&bytes);
        }

        Ok(None)
    }
}

/// Encode a full multipart message directly into a reusable buffer.
///
/// This is the single encode path every endpoint goes through -- the
/// leading empty delimiter frame is part of `msg` by the time it
/// reaches here (see [`crate::message::Message::encode`]), so this
/// function never has to special-case it.
pub fn encode_multipart(msg: &[Bytes], buf: &mut BytesMut) {
    if msg.is_empty() {
        return;
    }

    for (i, part) in msg.iter().enumerate() {
        let more = i < msg.len() - 1;
        let frame = WireFrame::new(part.clone(), more);
        let is_long = (frame.flags & 0x02) != 0;

        buf.reserve(if is_long { 9 } else { 2 } + part.len());
        buf.extend_from_slice(&[frame.flags]);
        if is_long {
            buf.extend_from_slice(&(part.len() as u64).to_be_bytes());
        } else {
            buf.extend_from_slice(&[part.len() as u8]);
        }
        buf.extend_from_slice(part);
    }
}
