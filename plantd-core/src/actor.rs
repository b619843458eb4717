//! Socket actor (protocol-agnostic core).
//!
//! One actor == one TCP connection.
//!
//! Responsibilities:
//! - Own the socket (`AsyncRead` + `AsyncWrite`)
//! - Drive read and write pumps (split-pump design)
//! - Move bytes between kernel and application
//! - Emit lifecycle events (connected / received / disconnected)
//! - Never contain routing logic (delegated to hubs)
//! - Never contain protocol logic (delegated to the layer above)

use crate::alloc::{IoArena, SlabMut};

use bytes::Bytes;
use flume::{Receiver, Sender};

use compio::io::{AsyncRead, AsyncWrite};

/// Messages from application to socket.
#[derive(Debug)]
pub enum UserCmd {
    /// Send raw bytes.
    SendBytes(Bytes),
    /// Close the socket.
    Close,
}

/// Events from socket to application.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Connection established.
    Connected,
    /// Received bytes from peer.
    ReceivedBytes(Bytes),
    /// Connection closed.
    Disconnected,
}

/// Minimal protocol-agnostic socket actor.
///
/// This is a building block. Wire framing is layered on top by
/// wrapping this actor and feeding its `ReceivedBytes` events into a
/// decoder.
pub struct SocketActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    stream: S,
    event_tx: Sender<SocketEvent>,
    cmd_rx: Receiver<UserCmd>,
    arena: IoArena,
    read_chunk: usize,
}

impl<S> SocketActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Construct an actor around an already-connected stream.
    pub fn new(
        stream: S,
        event_tx: Sender<SocketEvent>,
        cmd_rx: Receiver<UserCmd>,
        arena: IoArena,
    ) -> Self {
        Self {
            stream,
            event_tx,
            cmd_rx,
            arena,
            read_chunk: 8192,
        }
    }

    /// Override the per-read allocation size (defaults to 8KiB).
    #[must_use]
    pub fn with_read_chunk(mut self, size: usize) -> Self {
        self.read_chunk = size;
        self
    }

    /// Run the actor event loop (split pump design).
    ///
    /// - Write pump: application -> kernel, drained before every read so
    ///   queued writes (e.g. a handshake frame) never wait behind a read.
    /// - Read pump: kernel -> application.
    /// - No shared mutable state between pumps.
    pub async fn run(mut self) {
        use compio::buf::BufResult;
        use compio::io::{AsyncReadExt, AsyncWriteExt};

        let _ = self.event_tx.send(SocketEvent::Connected);

        let mut write_queue: Vec<Bytes> = Vec::new();

        loop {
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                match cmd {
                    UserCmd::SendBytes(b) => write_queue.push(b),
                    UserCmd::Close => {
                        let _ = self.event_tx.send(SocketEvent::Disconnected);
                        return;
                    }
                }
            }

            for buf in write_queue.drain(..) {
                let buf_vec = buf.to_vec();
                let BufResult(write_res, _) = (&mut self.stream).write_all(buf_vec).await;
                if let Err(e) = write_res {
                    tracing::debug!(error = %e, "socket write failed, tearing down actor");
                    let _ = self.event_tx.send(SocketEvent::Disconnected);
                    return;
                }
            }

            let slab: SlabMut = self.arena.alloc_mut(self.read_chunk);
            let BufResult(read_res, slab) = (&mut self.stream).read(slab).await;

            match read_res {
                Ok(0) => {
                    tracing::debug!("peer closed connection (EOF)");
                    let _ = self.event_tx.send(SocketEvent::Disconnected);
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "socket read failed");
                    let _ = self.event_tx.send(SocketEvent::Disconnected);
                    break;
                }
                Ok(_n) => {
                    let bytes = slab.freeze();
                    let _ = self.event_tx.send(SocketEvent::ReceivedBytes(bytes));
                }
            }

            // Yield so queued write commands are not starved by a busy read pump.
            compio::time::sleep(std::time::Duration::from_micros(1)).await;
        }
    }
}
