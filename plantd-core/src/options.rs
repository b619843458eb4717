//! Transport configuration options shared by every socket in the fabric.

use std::time::Duration;

/// Transport-level configuration options.
///
/// These mirror the tunables a production message-routing transport
/// needs regardless of which endpoint role (client, worker, broker
/// peer) is using the connection: timeouts, buffer sizing, and the
/// reconnect backoff schedule.
///
/// # Examples
///
/// ```
/// use plantd_core::options::TransportOptions;
/// use std::time::Duration;
///
/// let opts = TransportOptions::default()
///     .with_recv_timeout(Duration::from_secs(5))
///     .with_send_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Maximum time to wait for a receive operation.
    /// `None` blocks indefinitely.
    pub recv_timeout: Option<Duration>,

    /// Maximum time to wait for a send operation.
    /// `None` blocks indefinitely.
    pub send_timeout: Option<Duration>,

    /// Maximum time allowed to complete the connection handshake.
    pub handshake_timeout: Duration,

    /// Time to wait for pending messages to drain before closing.
    /// `None` closes immediately, discarding pending messages.
    pub linger: Option<Duration>,

    /// Initial reconnect delay after the connection is lost.
    pub reconnect_ivl: Duration,

    /// Maximum reconnect delay; the interval doubles on each attempt
    /// up to this cap. Zero disables backoff (always use `reconnect_ivl`).
    pub reconnect_ivl_max: Duration,

    /// Maximum time to wait for the underlying TCP connect to complete.
    /// Zero uses the OS default.
    pub connect_timeout: Duration,

    /// Maximum size of a single decoded message, in bytes. `None` means
    /// no limit.
    pub max_msg_size: Option<usize>,

    /// Size of arena-allocated buffers used when reading from the network.
    pub read_buffer_size: usize,

    /// Initial capacity of buffers used when encoding outgoing frames.
    pub write_buffer_size: usize,

    /// Stable identity to present on every (re)connection. If `None`,
    /// one is generated for the lifetime of the endpoint.
    pub routing_id: Option<bytes::Bytes>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None,
            send_timeout: None,
            handshake_timeout: Duration::from_secs(30),
            linger: Some(Duration::from_secs(30)),
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            max_msg_size: None,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            routing_id: None,
        }
    }
}

impl TransportOptions {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the receive timeout.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the linger duration.
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set the base reconnect interval.
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set the maximum reconnect interval for exponential backoff.
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum decoded message size.
    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set the read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the write buffer size.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set both read and write buffer sizes.
    pub fn with_buffer_sizes(mut self, read_size: usize, write_size: usize) -> Self {
        self.read_buffer_size = read_size;
        self.write_buffer_size = write_size;
        self
    }

    /// Set a stable routing identity.
    pub fn with_routing_id(mut self, id: bytes::Bytes) -> Self {
        self.routing_id = Some(id);
        self
    }

    /// Whether receive operations should be non-blocking.
    pub fn is_recv_nonblocking(&self) -> bool {
        matches!(self.recv_timeout, Some(d) if d.is_zero())
    }

    /// Whether send operations should be non-blocking.
    pub fn is_send_nonblocking(&self) -> bool {
        matches!(self.send_timeout, Some(d) if d.is_zero())
    }

    /// Validate an identity frame used to address a peer through a router.
    ///
    /// Identities must be 1-255 bytes and must not start with a null
    /// byte, which is reserved for auto-generated identities.
    pub fn validate_identity(id: &[u8]) -> std::io::Result<()> {
        if id.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "identity cannot be empty",
            ));
        }
        if id.len() > 255 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("identity cannot exceed 255 bytes (got {})", id.len()),
            ));
        }
        if id[0] == 0x00 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "identity cannot start with a null byte (reserved for auto-generated ids)",
            ));
        }
        Ok(())
    }

    /// Compute the reconnect delay for a given attempt number, honoring
    /// the exponential backoff schedule and its cap.
    pub fn next_reconnect_ivl(&self, attempt: u32) -> Duration {
        if self.reconnect_ivl_max.is_zero() {
            return self.reconnect_ivl;
        }
        let backoff = self.reconnect_ivl.saturating_mul(2u32.saturating_pow(attempt));
        backoff.min(self.reconnect_ivl_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = TransportOptions::default();
        assert!(opts.recv_timeout.is_none());
        assert!(opts.send_timeout.is_none());
        assert_eq!(opts.handshake_timeout, Duration::from_secs(30));
        assert_eq!(opts.reconnect_ivl, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_pattern() {
        let opts = TransportOptions::new()
            .with_recv_timeout(Duration::from_secs(5))
            .with_send_timeout(Duration::from_secs(10));

        assert_eq!(opts.recv_timeout, Some(Duration::from_secs(5)));
        assert_eq!(opts.send_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_nonblocking_checks() {
        let blocking = TransportOptions::new();
        assert!(!blocking.is_recv_nonblocking());

        let nonblocking = TransportOptions::new().with_recv_timeout(Duration::ZERO);
        assert!(nonblocking.is_recv_nonblocking());
    }

    #[test]
    fn test_exponential_backoff() {
        let opts = TransportOptions::new()
            .with_reconnect_ivl(Duration::from_millis(100))
            .with_reconnect_ivl_max(Duration::from_secs(10));

        assert_eq!(opts.next_reconnect_ivl(0), Duration::from_millis(100));
        assert_eq!(opts.next_reconnect_ivl(1), Duration::from_millis(200));
        assert_eq!(opts.next_reconnect_ivl(2), Duration::from_millis(400));
        assert_eq!(opts.next_reconnect_ivl(10), Duration::from_secs(10));
    }

    #[test]
    fn test_no_exponential_backoff() {
        let opts = TransportOptions::new().with_reconnect_ivl(Duration::from_millis(100));
        assert_eq!(opts.next_reconnect_ivl(0), Duration::from_millis(100));
        assert_eq!(opts.next_reconnect_ivl(10), Duration::from_millis(100));
    }

    #[test]
    fn test_identity_validation() {
        assert!(TransportOptions::validate_identity(b"worker-001").is_ok());
        assert!(TransportOptions::validate_identity(b"").is_err());
        assert!(TransportOptions::validate_identity(&[0x01; 256]).is_err());
        assert!(TransportOptions::validate_identity(b"\x00worker").is_err());
    }
}
