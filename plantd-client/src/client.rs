//! The MDPv0.2 client endpoint: synchronous-from-the-caller's-perspective
//! request/reply against a broker, with bounded retries and
//! from-scratch reconnection on timeout.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use plantd_core::error::PlantdError;
use plantd_core::options::TransportOptions;
use plantd_net::Connection;
use plantd_protocol::message::{Header, Message};

/// Default per-attempt request budget (spec's `client_timeout`).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);
/// Default number of retries after the first attempt's timeout.
pub const DEFAULT_RETRIES: u32 = 3;

/// Reserved service name answered directly by the broker.
pub const MMI_SERVICE: &str = "mmi.service";

/// A single-peer MDPv0.2 client.
///
/// Not `Sync`: a `Client` is owned by one caller at a time, per the
/// fabric's "caller owns linearisation" rule (spec §5). Share one
/// across tasks by wrapping it in an external mutex -- nothing in this
/// type enforces that beyond ordinary `&mut self` borrowing.
pub struct Client {
    connection: Connection,
    timeout: Duration,
    retries: u32,
}

impl Client {
    /// Connect to a broker at `addr` using default transport options.
    pub async fn connect(addr: SocketAddr) -> Result<Self, PlantdError> {
        Self::connect_with_options(addr, TransportOptions::default()).await
    }

    /// Connect to a broker at `addr` with explicit transport options.
    pub async fn connect_with_options(
        addr: SocketAddr,
        options: TransportOptions,
    ) -> Result<Self, PlantdError> {
        let connection = Connection::connect(addr, Header::Client, options).await?;
        Ok(Self {
            connection,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        })
    }

    /// Override the per-attempt request timeout (spec `client_timeout`).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Override the number of retries after the first timeout (spec
    /// `client_retries`).
    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    /// Send a REQUEST for `service` and wait for its REPLY.
    ///
    /// Implements spec §4.2's algorithm exactly: on timer expiry with
    /// retries remaining, the connection is torn down and recreated
    /// from scratch (discarding the old peer identity, which brokers
    /// would otherwise treat as a still-live client) before the
    /// *original* request is resent. Replies naming a different
    /// service, or arriving after the caller has already given up, are
    /// discarded rather than ever returned from the wrong call.
    pub async fn send(
        &mut self,
        service: &str,
        payload: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, PlantdError> {
        let service = Bytes::copy_from_slice(service.as_bytes());
        let request = Message::ClientRequest {
            service: service.clone(),
            payload,
        };

        let mut retries_remaining = self.retries;

        loop {
            self.connection.send(&request)?;

            let outcome = compio::time::timeout(self.timeout, self.wait_for_reply(&service)).await;

            let failure = match outcome {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(err)) => err,
                Err(_elapsed) => PlantdError::Timeout(self.timeout),
            };

            if retries_remaining == 0 {
                return Err(failure);
            }
            retries_remaining -= 1;
            tracing::debug!(
                service = %String::from_utf8_lossy(&service),
                retries_remaining,
                error = %failure,
                "client request failed, reconnecting and retrying"
            );
            self.connection.reconnect().await?;
        }
    }

    /// Query the broker's built-in `mmi.service` discovery endpoint:
    /// `Ok(true)` if the named service has at least one idle worker,
    /// `Ok(false)` if it has none (or is unknown).
    pub async fn lookup_service(&mut self, name: &str) -> Result<bool, PlantdError> {
        let payload = vec![Bytes::copy_from_slice(name.as_bytes())];
        let reply = self.send(MMI_SERVICE, payload).await?;
        match reply.first().map(bytes::Bytes::as_ref) {
            Some(b"200") => Ok(true),
            Some(b"404") => Ok(false),
            Some(b"501") => Err(PlantdError::protocol("mmi query reserved for future use")),
            _ => Err(PlantdError::malformed("unexpected mmi.service reply payload")),
        }
    }

    async fn wait_for_reply(&mut self, expected_service: &Bytes) -> Result<Vec<Bytes>, PlantdError> {
        loop {
            match self.connection.recv().await? {
                Message::ClientReply { service, payload } => {
                    if &service == expected_service {
                        return Ok(payload);
                    }
                    tracing::trace!(
                        expected = %String::from_utf8_lossy(expected_service),
                        got = %String::from_utf8_lossy(&service),
                        "discarding reply for a different service"
                    );
                }
                other => {
                    tracing::debug!(?other, "client ignoring non-reply message from broker");
                }
            }
        }
    }

    /// Tear down the connection without reconnecting.
    pub fn close(&self) {
        self.connection.close();
    }
}
