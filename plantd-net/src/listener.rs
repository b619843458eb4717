//! TCP accept loop for the broker's multi-peer side.
//!
//! Generalizes the teacher's single-peer `RouterHub` wiring to true
//! multi-peer routing: one connection actor per accepted stream,
//! registering with a [`RouterHub`] via [`HubEvent::PeerUp`] /
//! [`HubEvent::PeerDown`] the same way the teacher's socket layer
//! reports peer lifecycle to its hub.
//!
//! Peer identity here is derived from the TCP peer address at accept
//! time. This is sufficient for the fabric's purposes (addressing a
//! specific, currently-connected worker or client) without requiring a
//! handshake frame -- MDPv0.2 has none to spend on it.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use flume::{Receiver, Sender};
use futures::{select, FutureExt};

use plantd_core::actor::{SocketActor, SocketEvent, UserCmd};
use plantd_core::alloc::IoArena;
use plantd_core::error::PlantdError;
use plantd_core::options::TransportOptions;
use plantd_core::router::{HubEvent, PeerCmd};
use plantd_protocol::codec::encode_multipart;
use plantd_protocol::message::Message;
use plantd_protocol::session::{Session, SessionEvent};

/// A message decoded off one peer connection, tagged with the identity
/// the router hub knows that peer by.
#[derive(Debug)]
pub struct InboundMessage {
    /// Identity of the peer the message arrived from.
    pub identity: Bytes,
    /// The decoded application message.
    pub message: Message,
}

/// Bind `addr`, returning the listener for the caller to hand to
/// [`serve_on`].
///
/// Split out from [`serve`] so a caller that needs to distinguish a
/// fatal bind failure (wrong address, port already in use) from an
/// ordinary accept-loop I/O error -- the broker binary's exit code 1
/// vs. its general-error exit code -- can await the bind synchronously
/// before spawning the accept loop as a background task.
pub async fn bind(addr: SocketAddr) -> Result<compio::net::TcpListener, PlantdError> {
    let listener = compio::net::TcpListener::bind(addr).await.map_err(PlantdError::Io)?;
    tracing::info!(%addr, "listening for peer connections");
    Ok(listener)
}

/// Bind `addr` and accept peer connections forever.
///
/// Each accepted connection becomes its own actor + session pump,
/// registers with the hub, and forwards every message it decodes onto
/// `inbound_tx`. Returns only on a listener-level I/O error.
pub async fn serve(
    addr: SocketAddr,
    options: TransportOptions,
    hub_tx: Sender<HubEvent>,
    inbound_tx: Sender<InboundMessage>,
) -> Result<(), PlantdError> {
    let listener = bind(addr).await?;
    serve_on(listener, options, hub_tx, inbound_tx).await
}

/// Accept peer connections forever on an already-bound `listener`.
///
/// See [`bind`] for why binding is split out of [`serve`].
pub async fn serve_on(
    listener: compio::net::TcpListener,
    options: TransportOptions,
    hub_tx: Sender<HubEvent>,
    inbound_tx: Sender<InboundMessage>,
) -> Result<(), PlantdError> {
    loop {
        let (stream, peer_addr) = listener.accept().await.map_err(PlantdError::Io)?;
        let _ = plantd_core::tcp::enable_tcp_nodelay(&stream);

        let identity = Bytes::from(peer_addr.to_string().into_bytes());
        let options = options.clone();
        let hub_tx = hub_tx.clone();
        let inbound_tx = inbound_tx.clone();

        tracing::debug!(%peer_addr, "accepted peer connection");
        compio::runtime::spawn(async move {
            if let Err(err) = run_peer(stream, identity, options, hub_tx, inbound_tx).await {
                tracing::debug!(error = %err, "peer connection ended");
            }
        })
        .detach();
    }
}

async fn run_peer(
    stream: compio::net::TcpStream,
    identity: Bytes,
    options: TransportOptions,
    hub_tx: Sender<HubEvent>,
    inbound_tx: Sender<InboundMessage>,
) -> Result<(), PlantdError> {
    let (actor_cmd_tx, actor_cmd_rx) = flume::unbounded::<UserCmd>();
    let (event_tx, event_rx) = flume::unbounded::<SocketEvent>();
    let actor = SocketActor::new(stream, event_tx, actor_cmd_rx, IoArena::new())
        .with_read_chunk(options.read_buffer_size);
    compio::runtime::spawn(actor.run()).detach();

    let (peer_tx, peer_rx) = flume::unbounded::<PeerCmd>();
    hub_tx
        .send(HubEvent::PeerUp {
            identity: identity.clone(),
            tx: peer_tx,
        })
        .map_err(|_| PlantdError::ChannelSend)?;

    let mut session = match options.max_msg_size {
        Some(max) => Session::with_max_msg_size(max),
        None => Session::new(),
    };

    let result = pump(&mut session, &identity, &actor_cmd_tx, &event_rx, &peer_rx, &inbound_tx).await;

    let _ = hub_tx.send(HubEvent::PeerDown { identity });
    let _ = actor_cmd_tx.send(UserCmd::Close);
    result
}

async fn pump(
    session: &mut Session,
    identity: &Bytes,
    actor_cmd_tx: &Sender<UserCmd>,
    event_rx: &Receiver<SocketEvent>,
    peer_rx: &Receiver<PeerCmd>,
    inbound_tx: &Sender<InboundMessage>,
) -> Result<(), PlantdError> {
    loop {
        select! {
            event = event_rx.recv_async().fuse() => {
                match event {
                    Ok(SocketEvent::Connected) => {}
                    Ok(SocketEvent::ReceivedBytes(bytes)) => {
                        for ev in session.on_bytes(bytes) {
                            match ev {
                                SessionEvent::Message(message) => {
                                    let inbound = InboundMessage {
                                        identity: identity.clone(),
                                        message,
                                    };
                                    if inbound_tx.send(inbound).is_err() {
                                        return Ok(());
                                    }
                                }
                                SessionEvent::Malformed(err) => {
                                    tracing::warn!(?identity, error = %err, "dropped malformed message from peer");
                                }
                            }
                        }
                    }
                    Ok(SocketEvent::Disconnected) | Err(_) => return Ok(()),
                }
            }
            cmd = peer_rx.recv_async().fuse() => {
                match cmd {
                    Ok(PeerCmd::SendBody(parts)) => {
                        let mut buf = BytesMut::new();
                        encode_multipart(&parts, &mut buf);
                        if actor_cmd_tx.send(UserCmd::SendBytes(buf.freeze())).is_err() {
                            return Ok(());
                        }
                    }
                    Ok(PeerCmd::Close) | Err(_) => {
                        let _ = actor_cmd_tx.send(UserCmd::Close);
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::io::{AsyncReadExt, AsyncWriteExt};

    #[compio::test]
    async fn accepted_peer_registers_and_forwards_messages() {
        let port = portpicker::pick_unused_port().expect("free port");
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

        let (hub_tx, hub_rx) = flume::unbounded();
        let (inbound_tx, inbound_rx) = flume::unbounded();

        compio::runtime::spawn(serve(addr, TransportOptions::default(), hub_tx, inbound_tx)).detach();
        compio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client = compio::net::TcpStream::connect(addr).await.unwrap();
        let ready = Message::WorkerReady {
            service: Bytes::from_static(b"echo"),
        };
        let mut buf = BytesMut::new();
        encode_multipart(&ready.encode(), &mut buf);
        let compio::buf::BufResult(res, _) = client.write_all(buf.freeze().to_vec()).await;
        res.unwrap();

        let HubEvent::PeerUp { identity, tx } = hub_rx.recv_async().await.unwrap() else {
            panic!("expected PeerUp");
        };

        let inbound = inbound_rx.recv_async().await.unwrap();
        assert_eq!(inbound.identity, identity);
        assert!(matches!(inbound.message, Message::WorkerReady { .. }));

        let reply = Message::WorkerRequest {
            client: Bytes::from_static(b"client-1"),
            payload: vec![Bytes::from_static(b"hi")],
        };
        tx.send(PeerCmd::SendBody(reply.encode())).unwrap();

        let read_buf = vec![0u8; 256];
        let compio::buf::BufResult(n, _read_buf) = client.read(read_buf).await;
        assert!(n.unwrap() > 0);
    }
}
