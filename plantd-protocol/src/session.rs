//! Sans-IO message assembly: turn a byte stream into [`Message`]s.
//!
//! Unlike the ZMTP runtime this crate's wire framing was adapted from,
//! MDPv0.2 needs no binary greeting or handshake -- the protocol
//! header frame (`MDPC02`/`MDPW02`) is itself the only disambiguation
//! a peer needs. A `Session` is therefore just a [`crate::codec::FrameDecoder`]
//! plus multipart reassembly (by the MORE bit) plus [`Message::decode`],
//! driven by feeding it bytes as they arrive off the socket.
//!
//! The peer-identity frame the spec describes is never present in
//! these bytes: per the frame-layout contract it is "automatically
//! prepended on ingress and stripped on egress by the socket layer",
//! which here is `plantd-net`'s router hub -- it already knows which
//! connection a byte stream came from, so it tags decoded messages
//! with that identity out of band rather than parsing it off the wire.

use bytes::Bytes;
use plantd_core::buffer::SegmentedBuffer;
use plantd_core::error::PlantdError;

use crate::codec::FrameDecoder;
use crate::message::Message;

/// Events a session emits as bytes are fed into it.
pub enum SessionEvent {
    /// A fully assembled, decoded message.
    Message(Message),
    /// Frames arrived that do not decode to a valid `Message`.
    Malformed(PlantdError),
}

/// Sans-IO per-connection message assembler.
///
/// One `Session` per connection. The transport layer (`plantd-net`)
/// owns the socket and feeds this type whatever bytes it reads; this
/// type never touches I/O itself.
pub struct Session {
    decoder: FrameDecoder,
    recv: SegmentedBuffer,
    current: Vec<Bytes>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Construct a session with no maximum message size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            recv: SegmentedBuffer::new(),
            current: Vec::new(),
        }
    }

    /// Construct a session that rejects any single frame above `max` bytes.
    #[must_use]
    pub fn with_max_msg_size(max: usize) -> Self {
        Self {
            decoder: FrameDecoder::with_max_msg_size(max),
            recv: SegmentedBuffer::new(),
            current: Vec::new(),
        }
    }

    /// Feed newly received bytes into the session, returning every
    /// message (or malformed-message report) they completed.
    pub fn on_bytes(&mut self, bytes: Bytes) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.recv.push(bytes);

        loop {
            match self.decoder.decode(&mut self.recv) {
                Ok(Some(frame)) => {
                    let more = frame.more();
                    self.current.push(frame.payload);
                    if more {
                        continue;
                    }

                    let frames = std::mem::take(&mut self.current);
                    if frames.is_empty() {
                        continue;
                    }
                    match Message::decode(frames) {
                        Ok(message) => events.push(SessionEvent::Message(message)),
                        Err(e) => events.push(SessionEvent::Malformed(e)),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    events.push(SessionEvent::Malformed(PlantdError::malformed(e.to_string())));
                    break;
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_multipart;
    use crate::message::{Header, Message};
    use bytes::BytesMut;

    #[test]
    fn assembles_a_complete_message() {
        let msg = Message::ClientRequest {
            service: Bytes::from_static(b"echo"),
            payload: vec![Bytes::from_static(b"hi")],
        };

        let mut buf = BytesMut::new();
        encode_multipart(&msg.encode(), &mut buf);

        let mut session = Session::new();
        let events = session.on_bytes(buf.freeze());
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Message(message) => {
                assert!(matches!(message, Message::ClientRequest { .. }));
            }
            SessionEvent::Malformed(_) => panic!("expected a decoded message"),
        }
    }

    #[test]
    fn handles_partial_delivery_across_two_feeds() {
        let msg = Message::Heartbeat { header: Header::Worker };

        let mut buf = BytesMut::new();
        encode_multipart(&msg.encode(), &mut buf);
        let whole = buf.freeze();
        let (first, second) = whole.split_at(whole.len() / 2);

        let mut session = Session::new();
        assert!(session.on_bytes(Bytes::copy_from_slice(first)).is_empty());
        let events = session.on_bytes(Bytes::copy_from_slice(second));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Message(_)));
    }

    #[test]
    fn reports_malformed_message_without_dropping_the_connection() {
        let mut buf = BytesMut::new();
        // Missing empty-delimiter frame: [MDPC02, REQUEST-byte] only.
        let bogus = vec![
            Bytes::from_static(b"MDPC02"),
            Bytes::from(vec![0x01u8]),
        ];
        encode_multipart(&bogus, &mut buf);

        let mut session = Session::new();
        let events = session.on_bytes(buf.freeze());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Malformed(_)));
    }
}
