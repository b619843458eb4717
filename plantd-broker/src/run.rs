//! Top-level wiring: join the router hub, the multi-peer listener,
//! and the broker's own select-driven main loop into one running
//! service.

use std::net::SocketAddr;
use std::time::Duration;

use flume::Receiver;
use plantd_core::error::PlantdError;
use plantd_core::options::TransportOptions;
use plantd_core::router::{HubEvent, RouterCmd, RouterHub};
use plantd_net::listener::{self, InboundMessage};
use plantd_protocol::message::Message;

use crate::config::BrokerConfig;
use crate::registry::Broker;

/// Bind `addr` and run the broker until `shutdown_rx` fires.
///
/// Spawns the router hub and the accept loop as background tasks and
/// drives the broker's registry/dispatch logic on the calling task
/// until a shutdown signal arrives, at which point every registered
/// worker is sent a DISCONNECT before the hub is torn down.
pub async fn run(
    addr: SocketAddr,
    config: BrokerConfig,
    shutdown_rx: Receiver<()>,
) -> Result<(), PlantdError> {
    // Bind synchronously so a fatal init error (bad address, port
    // already in use) is reported to the caller -- and from there, the
    // `plantd-broker` binary's exit code 1 -- instead of being logged
    // from an undetached background task the caller can't observe.
    let tcp_listener = listener::bind(addr).await?;

    let (hub_tx, hub_rx) = flume::unbounded::<HubEvent>();
    let (cmd_tx, cmd_rx) = flume::unbounded::<RouterCmd>();
    let (inbound_tx, inbound_rx) = flume::unbounded::<InboundMessage>();

    let hub = RouterHub::new(hub_rx, cmd_rx);
    compio::runtime::spawn(hub.run()).detach();

    let listen_options = TransportOptions::default();
    compio::runtime::spawn(async move {
        if let Err(err) = listener::serve_on(tcp_listener, listen_options, hub_tx, inbound_tx).await {
            tracing::error!(error = %err, "broker listener stopped");
        }
    })
    .detach();

    let mut broker = Broker::new(config.clone());
    let tick = config.heartbeat_interval.min(Duration::from_millis(250));

    run_loop(&mut broker, &inbound_rx, &cmd_tx, &shutdown_rx, tick).await;

    broker.shutdown(&cmd_tx);
    // The listener and hub tasks are detached; dropping their channels
    // above (inbound_rx/cmd_tx go out of scope with this function) is
    // sufficient to let them wind down on their own next I/O attempt.

    Ok(())
}

async fn run_loop(
    broker: &mut Broker,
    inbound_rx: &Receiver<InboundMessage>,
    cmd_tx: &flume::Sender<RouterCmd>,
    shutdown_rx: &Receiver<()>,
    tick: Duration,
) {
    use futures::{select, FutureExt};

    loop {
        select! {
            inbound = inbound_rx.recv_async().fuse() => {
                match inbound {
                    Ok(InboundMessage { identity, message }) => {
                        log_inbound(&identity, &message);
                        broker.handle_inbound(identity, message, cmd_tx);
                    }
                    Err(_) => {
                        tracing::warn!("broker inbound channel closed; shutting down");
                        return;
                    }
                }
            }
            _ = shutdown_rx.recv_async().fuse() => {
                tracing::info!("broker received shutdown signal");
                return;
            }
            _ = compio::time::sleep(tick).fuse() => {
                broker.run_timers(cmd_tx);
            }
        }
    }
}

fn log_inbound(identity: &bytes::Bytes, message: &Message) {
    match message {
        Message::WorkerReady { service } => {
            tracing::debug!(?identity, service = %String::from_utf8_lossy(service), "READY");
        }
        Message::Disconnect { .. } => tracing::debug!(?identity, "DISCONNECT"),
        _ => {}
    }
}
