//! Router hub: the broker-side multi-peer routing table.
//!
//! Goals:
//! - Runtime-agnostic async loop (`futures::select!`, no tokio)
//! - Strict types: outbound commands carry an explicit destination
//!   identity; peer-bound commands are body-only
//! - No envelope inspection: the hub only ever reads the leading
//!   destination-identity frame. Everything after it is an already
//!   encoded application message and is forwarded byte-for-byte; the
//!   identity itself is supplied out of band (see `plantd-net`), never
//!   as a literal frame on the wire between peers.

use bytes::Bytes;
use flume::{Receiver, Sender};
use hashbrown::HashMap;

/// Commands sent from the application to the router hub.
#[derive(Debug)]
pub enum RouterCmd {
    /// Send a message; the first frame is the destination identity.
    SendMessage(Vec<Bytes>),
    /// Close a single peer's connection by identity.
    ClosePeer(Bytes),
    /// Close every connected peer.
    Close,
}

/// Commands sent from the hub to a single peer actor (body only; the
/// hub has already stripped the destination identity envelope).
#[derive(Debug)]
pub enum PeerCmd {
    /// Body frames to write to this peer's connection.
    SendBody(Vec<Bytes>),
    /// Close this peer's connection.
    Close,
}

/// Lifecycle events a peer actor reports to the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A peer connected (or reconnected) and registered its identity.
    PeerUp {
        /// Stable identity frame used to address this peer.
        identity: Bytes,
        /// Channel the hub uses to push outbound frames to the peer actor.
        tx: Sender<PeerCmd>,
    },
    /// A peer's connection was lost.
    PeerDown {
        /// The identity that is no longer reachable.
        identity: Bytes,
    },
}

/// Owns the identity -> peer-channel routing table for one bound
/// listener and dispatches outbound frames by explicit destination
/// identity.
///
/// This runs once per listener (e.g. once per broker) and coordinates
/// any number of peer actors registering and deregistering over time.
pub struct RouterHub {
    peers: HashMap<Bytes, Sender<PeerCmd>>,
    hub_rx: Receiver<HubEvent>,
    cmd_rx: Receiver<RouterCmd>,
}

impl RouterHub {
    /// Construct a hub over the given lifecycle-event and command channels.
    pub fn new(hub_rx: Receiver<HubEvent>, cmd_rx: Receiver<RouterCmd>) -> Self {
        Self {
            peers: HashMap::new(),
            hub_rx,
            cmd_rx,
        }
    }

    /// Number of currently registered peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether a given identity is currently routable.
    #[must_use]
    pub fn has_peer(&self, identity: &Bytes) -> bool {
        self.peers.contains_key(identity)
    }

    /// Drive the hub's event loop until both channels close.
    pub async fn run(mut self) {
        use futures::select;
        use futures::FutureExt;

        loop {
            select! {
                msg = self.hub_rx.recv_async().fuse() => {
                    match msg {
                        Ok(ev) => self.handle_peer_event(ev),
                        Err(_) => break,
                    }
                }
                msg = self.cmd_rx.recv_async().fuse() => {
                    match msg {
                        Ok(cmd) => self.handle_cmd(cmd),
                        Err(_) => break,
                    }
                }
            }
        }

        for tx in self.peers.values() {
            let _ = tx.send(PeerCmd::Close);
        }
    }

    fn handle_peer_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::PeerUp { identity, tx } => {
                tracing::debug!(peers = self.peers.len() + 1, "peer registered with router hub");
                self.peers.insert(identity, tx);
            }
            HubEvent::PeerDown { identity } => {
                self.peers.remove(&identity);
                tracing::debug!(peers = self.peers.len(), "peer deregistered from router hub");
            }
        }
    }

    fn handle_cmd(&mut self, cmd: RouterCmd) {
        match cmd {
            RouterCmd::SendMessage(parts) => self.route_outbound(parts),
            RouterCmd::ClosePeer(identity) => {
                if let Some(tx) = self.peers.remove(&identity) {
                    let _ = tx.send(PeerCmd::Close);
                }
            }
            RouterCmd::Close => {
                for tx in self.peers.values() {
                    let _ = tx.send(PeerCmd::Close);
                }
            }
        }
    }

    /// Route an outbound `[identity, body...]` message to its peer.
    ///
    /// `body` is forwarded verbatim -- callers pass a fully encoded
    /// application message (already carrying its own leading
    /// empty-delimiter frame where the protocol requires one), so the
    /// hub never inspects or strips anything beyond the destination
    /// identity itself.
    ///
    /// Silently drops the message if the identity is unknown -- the
    /// peer disconnected between the caller deciding to send and the
    /// hub processing the command, which is a normal race, not an error.
    fn route_outbound(&mut self, mut parts: Vec<Bytes>) {
        if parts.is_empty() {
            return;
        }

        let target = parts.remove(0);

        if let Some(tx) = self.peers.get(&target) {
            let _ = tx.send(PeerCmd::SendBody(parts));
        } else {
            tracing::trace!("dropped outbound message for unknown peer identity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_up_then_down_updates_table() {
        let (hub_tx, hub_rx) = flume::unbounded();
        let (_cmd_tx, cmd_rx) = flume::unbounded();
        let mut hub = RouterHub::new(hub_rx, cmd_rx);

        let (peer_tx, _peer_rx) = flume::unbounded();
        let id = Bytes::from_static(b"worker-1");
        hub_tx
            .send(HubEvent::PeerUp { identity: id.clone(), tx: peer_tx })
            .unwrap();
        hub.handle_peer_event(hub_rx.try_recv().unwrap());
        assert!(hub.has_peer(&id));

        hub_tx.send(HubEvent::PeerDown { identity: id.clone() }).unwrap();
        hub.handle_peer_event(hub_rx.try_recv().unwrap());
        assert!(!hub.has_peer(&id));
    }
}
