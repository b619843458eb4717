//! MDPv0.2 message model: the single encode/decode path for every role.
//!
//! Every message on the wire carries, in order:
//!
//! ```text
//! [ peer-identity ] [ empty-delimiter ] [ protocol-header ] [ command ] [ ...role-specific frames... ]
//! ```
//!
//! The peer-identity frame is added and stripped by the transport layer
//! (see `plantd-net`), never by this module. Everything from the empty
//! delimiter onward is what [`Message::encode`] produces and
//! [`Message::decode`] consumes -- there is exactly one place in the
//! whole fabric that knows this layout, which is what keeps the
//! empty-delimiter frame from ever being hand-rolled incorrectly at a
//! call site.

use bytes::Bytes;
use plantd_core::error::PlantdError;

/// Client-role protocol header.
pub const HEADER_CLIENT: &[u8] = b"MDPC02";
/// Worker-role protocol header.
pub const HEADER_WORKER: &[u8] = b"MDPW02";

/// Single-byte command codes.
///
/// MDPv0.2 leaves the command encoding to the implementer; a single
/// byte keeps every frame minimal, which matters because the broker
/// parses one per inbound message on its single execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Client -> broker, or broker -> worker: a service call.
    Request = 0x01,
    /// Broker -> client, or worker -> broker: a service reply.
    Reply = 0x02,
    /// Worker -> broker: register for a service.
    Ready = 0x03,
    /// Either direction: liveness probe.
    Heartbeat = 0x04,
    /// Either direction: graceful teardown.
    Disconnect = 0x05,
}

impl Command {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Reply),
            0x03 => Some(Self::Ready),
            0x04 => Some(Self::Heartbeat),
            0x05 => Some(Self::Disconnect),
            _ => None,
        }
    }

    const fn to_byte(self) -> u8 {
        self as u8
    }
}

/// The protocol header a message was framed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// `MDPC02`.
    Client,
    /// `MDPW02`.
    Worker,
}

impl Header {
    fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            HEADER_CLIENT => Some(Self::Client),
            HEADER_WORKER => Some(Self::Worker),
            _ => None,
        }
    }

    const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Client => HEADER_CLIENT,
            Self::Worker => HEADER_WORKER,
        }
    }
}

/// A fully typed MDPv0.2 message, independent of peer identity.
///
/// This is everything after `[peer-identity] [empty-delimiter]` on the
/// wire: header, command, and the role-specific frames the command
/// carries per the spec's frame-layout table.
#[derive(Debug, Clone)]
pub enum Message {
    /// Client -> broker REQUEST: `service-name`, then payload frames.
    ClientRequest { service: Bytes, payload: Vec<Bytes> },
    /// Broker -> client REPLY: `service-name`, then payload frames.
    ClientReply { service: Bytes, payload: Vec<Bytes> },
    /// Worker -> broker READY: `service-name`.
    WorkerReady { service: Bytes },
    /// Worker -> broker REPLY: `client-identity`, empty-delimiter, payload.
    WorkerReply { client: Bytes, payload: Vec<Bytes> },
    /// Broker -> worker REQUEST: `client-identity`, empty-delimiter, payload.
    WorkerRequest { client: Bytes, payload: Vec<Bytes> },
    /// Either direction, either header: HEARTBEAT.
    Heartbeat { header: Header },
    /// Either direction, either header: DISCONNECT.
    Disconnect { header: Header },
}

impl Message {
    fn header(&self) -> Header {
        match self {
            Self::ClientRequest { .. } | Self::ClientReply { .. } => Header::Client,
            Self::WorkerReady { .. } | Self::WorkerReply { .. } | Self::WorkerRequest { .. } => {
                Header::Worker
            }
            Self::Heartbeat { header } | Self::Disconnect { header } => *header,
        }
    }

    fn command(&self) -> Command {
        match self {
            Self::ClientRequest { .. } | Self::WorkerRequest { .. } => Command::Request,
            Self::ClientReply { .. } | Self::WorkerReply { .. } => Command::Reply,
            Self::WorkerReady { .. } => Command::Ready,
            Self::Heartbeat { .. } => Command::Heartbeat,
            Self::Disconnect { .. } => Command::Disconnect,
        }
    }

    /// Encode into the frame sequence written after the identity frame:
    /// `[empty-delimiter, header, command, ...]`.
    ///
    /// The leading empty delimiter is always emitted here -- callers
    /// never construct it themselves.
    #[must_use]
    pub fn encode(&self) -> Vec<Bytes> {
        let mut out = vec![
            Bytes::new(),
            Bytes::from_static(self.header().as_bytes()),
            Bytes::from(vec![self.command().to_byte()]),
        ];

        match self {
            Self::ClientRequest { service, payload } | Self::ClientReply { service, payload } => {
                out.push(service.clone());
                out.extend(payload.iter().cloned());
            }
            Self::WorkerReady { service } => {
                out.push(service.clone());
            }
            Self::WorkerReply { client, payload } | Self::WorkerRequest { client, payload } => {
                out.push(client.clone());
                out.push(Bytes::new());
                out.extend(payload.iter().cloned());
            }
            Self::Heartbeat { .. } | Self::Disconnect { .. } => {}
        }

        out
    }

    /// Decode the frame sequence following the identity frame:
    /// `[empty-delimiter, header, command, ...]`.
    ///
    /// Fails with [`PlantdError::MalformedMessage`] exactly per the
    /// contract: frame count below the role minimum, unrecognised
    /// header, command inapplicable to the observed direction, or a
    /// required empty-delimiter frame that is missing or non-empty.
    pub fn decode(mut frames: Vec<Bytes>) -> Result<Self, PlantdError> {
        if frames.len() < 3 {
            return Err(PlantdError::malformed("message shorter than role minimum"));
        }

        let delimiter = frames.remove(0);
        if !delimiter.is_empty() {
            return Err(PlantdError::malformed("missing empty-delimiter frame"));
        }

        let header_bytes = frames.remove(0);
        let header = Header::from_bytes(&header_bytes)
            .ok_or_else(|| PlantdError::malformed("unrecognised protocol header"))?;

        let command_frame = frames.remove(0);
        let command_byte = *command_frame
            .first()
            .ok_or_else(|| PlantdError::malformed("empty command frame"))?;
        let command = Command::from_byte(command_byte)
            .ok_or_else(|| PlantdError::malformed("unknown command byte"))?;

        match (header, command) {
            (Header::Client, Command::Request) => {
                let (service, payload) = split_service_and_payload(frames)?;
                Ok(Self::ClientRequest { service, payload })
            }
            (Header::Client, Command::Reply) => {
                let (service, payload) = split_service_and_payload(frames)?;
                Ok(Self::ClientReply { service, payload })
            }
            (Header::Worker, Command::Ready) => {
                if frames.len() != 1 {
                    return Err(PlantdError::malformed("READY must carry exactly a service name"));
                }
                Ok(Self::WorkerReady { service: frames.remove(0) })
            }
            (Header::Worker, Command::Reply) => {
                let (client, payload) = split_identity_and_payload(frames)?;
                Ok(Self::WorkerReply { client, payload })
            }
            (Header::Worker, Command::Request) => {
                let (client, payload) = split_identity_and_payload(frames)?;
                Ok(Self::WorkerRequest { client, payload })
            }
            (header, Command::Heartbeat) => {
                if !frames.is_empty() {
                    return Err(PlantdError::malformed("HEARTBEAT carries no further frames"));
                }
                Ok(Self::Heartbeat { header })
            }
            (header, Command::Disconnect) => {
                if !frames.is_empty() {
                    return Err(PlantdError::malformed("DISCONNECT carries no further frames"));
                }
                Ok(Self::Disconnect { header })
            }
            (Header::Client, Command::Ready) => {
                Err(PlantdError::malformed("READY is not valid on the client header"))
            }
        }
    }
}

fn split_service_and_payload(mut frames: Vec<Bytes>) -> Result<(Bytes, Vec<Bytes>), PlantdError> {
    if frames.is_empty() {
        return Err(PlantdError::malformed("REQUEST/REPLY requires a service-name frame"));
    }
    let service = frames.remove(0);
    if frames.is_empty() {
        return Err(PlantdError::malformed("REQUEST/REPLY requires at least one payload frame"));
    }
    Ok((service, frames))
}

fn split_identity_and_payload(mut frames: Vec<Bytes>) -> Result<(Bytes, Vec<Bytes>), PlantdError> {
    if frames.len() < 2 {
        return Err(PlantdError::malformed(
            "worker-bound REQUEST/REPLY requires client-identity and an empty-delimiter frame",
        ));
    }
    let client = frames.remove(0);
    let delimiter = frames.remove(0);
    if !delimiter.is_empty() {
        return Err(PlantdError::malformed("missing empty-delimiter after client-identity"));
    }
    if frames.is_empty() {
        return Err(PlantdError::malformed("worker-bound REQUEST/REPLY requires payload frames"));
    }
    Ok((client, frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_client_request() {
        let msg = Message::ClientRequest {
            service: Bytes::from_static(b"echo"),
            payload: vec![Bytes::from_static(b"hello")],
        };
        let frames = msg.encode();
        let decoded = Message::decode(frames).unwrap();
        match decoded {
            Message::ClientRequest { service, payload } => {
                assert_eq!(&service[..], b"echo");
                assert_eq!(payload, vec![Bytes::from_static(b"hello")]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn round_trips_worker_bound_request() {
        let msg = Message::WorkerRequest {
            client: Bytes::from_static(b"client-7"),
            payload: vec![Bytes::from_static(b"payload")],
        };
        let frames = msg.encode();
        assert!(frames[3] == Bytes::from_static(b"client-7"));
        assert!(frames[4].is_empty());
        let decoded = Message::decode(frames).unwrap();
        match decoded {
            Message::WorkerRequest { client, payload } => {
                assert_eq!(&client[..], b"client-7");
                assert_eq!(payload, vec![Bytes::from_static(b"payload")]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn heartbeat_and_disconnect_carry_nothing() {
        let hb = Message::Heartbeat { header: Header::Worker };
        let frames = hb.encode();
        assert_eq!(frames.len(), 3);
        assert!(matches!(Message::decode(frames).unwrap(), Message::Heartbeat { .. }));
    }

    #[test]
    fn missing_delimiter_is_malformed() {
        // [MDPC02, REQUEST, service, payload] -- no leading empty delimiter.
        let frames = vec![
            Bytes::from_static(HEADER_CLIENT),
            Bytes::from(vec![Command::Request.to_byte()]),
            Bytes::from_static(b"echo"),
            Bytes::from_static(b"x"),
        ];
        let err = Message::decode(frames).unwrap_err();
        assert!(matches!(err, PlantdError::MalformedMessage(_)));
    }

    #[test]
    fn unknown_header_is_malformed() {
        let frames = vec![
            Bytes::new(),
            Bytes::from_static(b"BOGUS01"),
            Bytes::from(vec![Command::Request.to_byte()]),
        ];
        assert!(Message::decode(frames).is_err());
    }
}
