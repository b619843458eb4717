//! MDPv0.2 worker endpoint state machine.
//!
//! ```text
//!                 ┌──────────────┐
//!    start ─────▶ │  Connecting  │
//!                 └──────┬───────┘
//!                        │ send READY
//!                        ▼
//!                 ┌──────────────┐
//!                 │    Idle      │◀──────────┐
//!                 └──┬────────┬──┘           │
//!     recv REQUEST   │        │ heartbeat tick
//!                    ▼        ▼
//!             ┌──────────┐  send HEARTBEAT
//!             │ Serving  │  (stay in Idle)
//!             └────┬─────┘
//!                  │ handler returns, send REPLY
//!                  ▼
//!               back to Idle
//! ```
//!
//! From any state, missed broker heartbeats beyond the liveness
//! threshold or a transport failure drop to `Reconnecting` and
//! re-enter `Connecting` after an exponential backoff delay.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{select, FutureExt};
use plantd_core::error::PlantdError;
use plantd_core::options::TransportOptions;
use plantd_core::reconnect::ReconnectState;
use plantd_net::Connection;
use plantd_protocol::message::{Header, Message};

/// The worker's position in its state machine. Exposed mainly for
/// introspection/logging; `serve` drives transitions internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Establishing (or re-establishing) the transport and sending READY.
    Connecting,
    /// Registered with the broker, waiting for a REQUEST or heartbeat tick.
    Idle,
    /// Running the user handler for an in-flight request.
    Serving,
    /// Connection lost; waiting out the backoff delay before reconnecting.
    Reconnecting,
}

/// Timing knobs for a worker's heartbeat and reconnect behavior.
///
/// Defaults match spec §4.3's normative timing contract.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between outbound heartbeats when otherwise idle.
    pub heartbeat_interval: Duration,
    /// Missed intervals of silence from the broker before it's dead.
    pub heartbeat_liveness: u32,
    /// Initial reconnect backoff delay.
    pub reconnect_backoff_initial: Duration,
    /// Reconnect backoff cap.
    pub reconnect_backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2500),
            heartbeat_liveness: 3,
            reconnect_backoff_initial: Duration::from_millis(2500),
            reconnect_backoff_max: Duration::from_secs(30),
        }
    }
}

/// A single-instance MDPv0.2 worker serving one service.
///
/// Parallelism across requests for the same service comes from
/// registering multiple `Worker` instances under the same service
/// name, each with its own transport peer identity (spec §5); this
/// type itself runs one receive/handle/reply loop.
pub struct Worker {
    addr: std::net::SocketAddr,
    service: Bytes,
    config: WorkerConfig,
    options: TransportOptions,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    /// Construct a worker that will register for `service` at `addr`
    /// once [`Worker::serve`] is called.
    pub fn new(addr: std::net::SocketAddr, service: impl Into<Bytes>, config: WorkerConfig) -> Self {
        Self {
            addr,
            service: service.into(),
            config,
            options: TransportOptions::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serve requests with `handler` until [`Worker::close`] is called
    /// or an unrecoverable framing error occurs while sending.
    ///
    /// `handler` runs synchronously inside the worker's single task; a
    /// panic inside it is caught and converted into an empty REPLY with
    /// an error status frame, per spec's failure semantics -- the
    /// worker itself stays `Idle` rather than crashing or disconnecting.
    pub async fn serve<F>(&mut self, handler: F) -> Result<(), PlantdError>
    where
        F: Fn(Vec<Bytes>) -> Vec<Bytes> + Send + Sync + 'static,
    {
        let handler: Arc<dyn Fn(Vec<Bytes>) -> Vec<Bytes> + Send + Sync> = Arc::new(handler);

        let backoff_opts = TransportOptions::default()
            .with_reconnect_ivl(self.config.reconnect_backoff_initial)
            .with_reconnect_ivl_max(self.config.reconnect_backoff_max);
        let mut backoff = ReconnectState::new(&backoff_opts);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.run_connected(&handler).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        service = %String::from_utf8_lossy(&self.service),
                        error = %err,
                        "worker lost its broker connection; backing off before reconnect"
                    );
                    let delay = backoff.next_delay();
                    compio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Request a graceful DISCONNECT and stop serving. Takes effect at
    /// the worker's next poll point, not instantaneously.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    async fn run_connected(
        &mut self,
        handler: &Arc<dyn Fn(Vec<Bytes>) -> Vec<Bytes> + Send + Sync>,
    ) -> Result<(), PlantdError> {
        let mut connection = Connection::connect(self.addr, Header::Worker, self.options.clone()).await?;
        connection.send(&Message::WorkerReady {
            service: self.service.clone(),
        })?;
        tracing::debug!(service = %String::from_utf8_lossy(&self.service), "worker registered with broker");

        let liveness_window = self.config.heartbeat_interval * self.config.heartbeat_liveness;
        let mut last_heard = Instant::now();
        let mut last_sent = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                let _ = connection.send(&Message::Disconnect { header: Header::Worker });
                return Ok(());
            }

            if last_heard.elapsed() >= liveness_window {
                return Err(PlantdError::transport("broker heartbeat liveness exceeded"));
            }

            let due_in = self
                .config
                .heartbeat_interval
                .saturating_sub(last_sent.elapsed());

            select! {
                incoming = connection.recv().fuse() => {
                    let message = incoming?;
                    last_heard = Instant::now();

                    match message {
                        Message::WorkerRequest { client, payload } => {
                            let reply_payload = run_handler(handler, payload);
                            connection.send(&Message::WorkerReply { client, payload: reply_payload })?;
                            last_sent = Instant::now();
                        }
                        Message::Heartbeat { .. } => {}
                        Message::Disconnect { .. } => {
                            return Err(PlantdError::transport("broker requested disconnect"));
                        }
                        other => {
                            tracing::debug!(?other, "worker ignoring unexpected message from broker");
                        }
                    }
                }
                _ = compio::time::sleep(due_in).fuse() => {
                    connection.send(&Message::Heartbeat { header: Header::Worker })?;
                    last_sent = Instant::now();
                }
            }
        }
    }
}

/// Run the user handler, catching panics per spec's failure semantics:
/// a panicking handler becomes an empty-payload error reply rather than
/// taking the worker down.
fn run_handler(handler: &Arc<dyn Fn(Vec<Bytes>) -> Vec<Bytes> + Send + Sync>, payload: Vec<Bytes>) -> Vec<Bytes> {
    let handler = handler.clone();
    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(reply) => reply,
        Err(_) => {
            tracing::error!("worker handler panicked; replying with an error status");
            vec![Bytes::from_static(b"ERROR"), Bytes::from_static(b"handler panicked")]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use compio::buf::BufResult;
    use compio::io::{AsyncReadExt, AsyncWriteExt};
    use plantd_protocol::codec::encode_multipart;
    use plantd_protocol::session::{Session, SessionEvent};

    async fn recv_one(stream: &mut compio::net::TcpStream) -> Message {
        let mut session = Session::new();
        loop {
            let buf = vec![0u8; 4096];
            let BufResult(n, buf) = stream.read(buf).await;
            let n = n.unwrap();
            assert!(n > 0);
            for event in session.on_bytes(Bytes::copy_from_slice(&buf[..n])) {
                if let SessionEvent::Message(message) = event {
                    return message;
                }
            }
        }
    }

    async fn send_one(stream: &mut compio::net::TcpStream, message: &Message) {
        let mut buf = BytesMut::new();
        encode_multipart(&message.encode(), &mut buf);
        let BufResult(res, _) = stream.write_all(buf.freeze().to_vec()).await;
        res.unwrap();
    }

    #[compio::test]
    async fn registers_then_serves_one_request() {
        let port = portpicker::pick_unused_port().expect("free port");
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let listener = compio::net::TcpListener::bind(addr).await.unwrap();

        let server = compio::runtime::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let ready = recv_one(&mut stream).await;
            assert!(matches!(ready, Message::WorkerReady { .. }));

            let request = Message::WorkerRequest {
                client: Bytes::from_static(b"client-1"),
                payload: vec![Bytes::from_static(b"hello")],
            };
            send_one(&mut stream, &request).await;

            let reply = recv_one(&mut stream).await;
            match reply {
                Message::WorkerReply { client, payload } => {
                    assert_eq!(&client[..], b"client-1");
                    assert_eq!(payload, vec![Bytes::from_static(b"HELLO")]);
                }
                _ => panic!("expected a WorkerReply"),
            }
        });

        let mut worker = Worker::new(addr, Bytes::from_static(b"shout"), WorkerConfig::default());
        let handle_worker = compio::runtime::spawn(async move {
            let w = &mut worker;
            let _ = compio::time::timeout(
                Duration::from_millis(500),
                w.serve(|payload: Vec<Bytes>| {
                    vec![Bytes::from(payload[0].to_ascii_uppercase())]
                }),
            )
            .await;
        });

        server.await.unwrap();
        let _ = handle_worker.await;
    }

    #[compio::test]
    async fn panicking_handler_yields_error_reply_and_keeps_serving() {
        let port = portpicker::pick_unused_port().expect("free port");
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let listener = compio::net::TcpListener::bind(addr).await.unwrap();

        let server = compio::runtime::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ready = recv_one(&mut stream).await;

            let request = Message::WorkerRequest {
                client: Bytes::from_static(b"client-1"),
                payload: vec![Bytes::from_static(b"boom")],
            };
            send_one(&mut stream, &request).await;

            let reply = recv_one(&mut stream).await;
            match reply {
                Message::WorkerReply { payload, .. } => {
                    assert_eq!(payload[0], Bytes::from_static(b"ERROR"));
                }
                _ => panic!("expected a WorkerReply"),
            }
        });

        let mut worker = Worker::new(addr, Bytes::from_static(b"panicky"), WorkerConfig::default());
        let handle_worker = compio::runtime::spawn(async move {
            let w = &mut worker;
            let _ = compio::time::timeout(
                Duration::from_millis(500),
                w.serve(|_payload: Vec<Bytes>| -> Vec<Bytes> { panic!("handler exploded") }),
            )
            .await;
        });

        server.await.unwrap();
        let _ = handle_worker.await;
    }
}
