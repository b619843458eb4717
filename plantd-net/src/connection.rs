//! Reconnecting single-peer TCP connection for client and worker endpoints.
//!
//! Modeled on the teacher's `DealerSocket` construction: a [`SocketActor`]
//! owns the stream and runs on its own task, a [`Session`] reassembles
//! frames into [`Message`]s, and the two are joined over `flume`
//! channels. Unlike the teacher's socket, which reconnects the same
//! `DealerSocket` value in place, `Connection::reconnect` tears the
//! whole actor down and re-arms from scratch -- new stream, new peer
//! identity handshake, new `Session` -- matching this fabric's client
//! retry algorithm (spec step 4: "reconnect from scratch").

use std::net::SocketAddr;

use bytes::BytesMut;
use flume::{Receiver, Sender};
use plantd_core::alloc::IoArena;
use plantd_core::actor::{SocketActor, SocketEvent, UserCmd};
use plantd_core::error::PlantdError;
use plantd_core::options::TransportOptions;
use plantd_core::reconnect::ReconnectState;
use plantd_protocol::codec::encode_multipart;
use plantd_protocol::message::{Header, Message};
use plantd_protocol::session::{Session, SessionEvent};

/// A reconnecting, single-peer TCP connection speaking MDPv0.2.
///
/// One `Connection` backs one `plantd-client` or `plantd-worker`
/// endpoint. It is not `Sync`; callers that need to share one across
/// tasks must external-mutex it, per the fabric's "caller owns
/// linearisation" rule.
pub struct Connection {
    addr: SocketAddr,
    header: Header,
    options: TransportOptions,
    cmd_tx: Sender<UserCmd>,
    event_rx: Receiver<SocketEvent>,
    session: Session,
    reconnect: ReconnectState,
}

impl Connection {
    /// Connect to `addr`, identifying this peer with `header`
    /// (`Header::Client` or `Header::Worker`).
    pub async fn connect(
        addr: SocketAddr,
        header: Header,
        options: TransportOptions,
    ) -> Result<Self, PlantdError> {
        let (cmd_tx, event_rx) = spawn_actor(addr, &options).await?;
        Ok(Self {
            addr,
            header,
            reconnect: ReconnectState::new(&options),
            options,
            cmd_tx,
            event_rx,
            session: new_session(&options),
        })
    }

    /// Encode and send a message to the connected peer.
    pub fn send(&self, message: &Message) -> Result<(), PlantdError> {
        let mut buf = BytesMut::new();
        encode_multipart(&message.encode(), &mut buf);
        self.cmd_tx
            .send(UserCmd::SendBytes(buf.freeze()))
            .map_err(|_| PlantdError::ChannelSend)
    }

    /// Wait for the next fully decoded message.
    ///
    /// Returns `Err(PlantdError::Transport(_))` once the underlying
    /// connection is lost; the caller decides whether to call
    /// [`Connection::reconnect`] or give up.
    pub async fn recv(&mut self) -> Result<Message, PlantdError> {
        loop {
            match self.event_rx.recv_async().await {
                Ok(SocketEvent::Connected) => continue,
                Ok(SocketEvent::ReceivedBytes(bytes)) => {
                    for event in self.session.on_bytes(bytes) {
                        match event {
                            SessionEvent::Message(message) => return Ok(message),
                            SessionEvent::Malformed(err) => {
                                tracing::warn!(error = %err, "dropped malformed message from peer");
                            }
                        }
                    }
                }
                Ok(SocketEvent::Disconnected) | Err(_) => {
                    return Err(PlantdError::transport("connection to peer lost"));
                }
            }
        }
    }

    /// Tear down the current actor (if still alive) and reconnect from
    /// scratch, honoring the exponential backoff schedule.
    ///
    /// Resets the session: any partially assembled message from the
    /// old connection is discarded, matching "reconnect from scratch".
    pub async fn reconnect(&mut self) -> Result<(), PlantdError> {
        let delay = self.reconnect.next_delay();
        if !delay.is_zero() {
            compio::time::sleep(delay).await;
        }

        let _ = self.cmd_tx.send(UserCmd::Close);

        let (cmd_tx, event_rx) = spawn_actor(self.addr, &self.options).await?;
        self.cmd_tx = cmd_tx;
        self.event_rx = event_rx;
        self.session = new_session(&self.options);
        self.reconnect.reset();
        Ok(())
    }

    /// The protocol header this connection identifies itself with.
    #[must_use]
    pub const fn header(&self) -> Header {
        self.header
    }

    /// Close the connection without reconnecting.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(UserCmd::Close);
    }
}

fn new_session(options: &TransportOptions) -> Session {
    match options.max_msg_size {
        Some(max) => Session::with_max_msg_size(max),
        None => Session::new(),
    }
}

async fn spawn_actor(
    addr: SocketAddr,
    options: &TransportOptions,
) -> Result<(Sender<UserCmd>, Receiver<SocketEvent>), PlantdError> {
    let connect_fut = compio::net::TcpStream::connect(addr);
    let stream = if options.connect_timeout.is_zero() {
        connect_fut.await
    } else {
        compio::time::timeout(options.connect_timeout, connect_fut)
            .await
            .map_err(|_| PlantdError::transport("connect timed out"))?
    }
    .map_err(|e| PlantdError::transport(e.to_string()))?;

    plantd_core::tcp::enable_tcp_nodelay(&stream).map_err(PlantdError::Io)?;

    let (cmd_tx, cmd_rx) = flume::unbounded();
    let (event_tx, event_rx) = flume::unbounded();
    let actor = SocketActor::new(stream, event_tx, cmd_rx, IoArena::new())
        .with_read_chunk(options.read_buffer_size);

    compio::runtime::spawn(actor.run()).detach();

    Ok((cmd_tx, event_rx))
}
