//! Error taxonomy shared by every `plantd` fabric component.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for fabric operations.
///
/// Variants map directly onto the error taxonomy every component
/// (client, worker, broker, supervision) reports through: transport
/// failures, malformed wire data, timeouts, protocol violations,
/// an open circuit breaker, missing services, and an internal
/// catch-all for invariant violations that should never occur.
#[derive(Error, Debug)]
pub enum PlantdError {
    /// The underlying connection could not be established or was lost.
    #[error("transport error: {0}")]
    Transport(String),

    /// Raw I/O failure underneath a transport operation.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame or message did not decode per the wire format.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// An operation did not complete within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A peer sent a structurally valid but contextually illegal message
    /// (unexpected command, missing delimiter, unknown protocol header).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A circuit breaker rejected the call because it is open.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// The requested service or worker does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sending on an internal channel failed because the receiver is gone.
    #[error("channel send failed")]
    ChannelSend,

    /// Receiving from an internal channel failed because the sender is gone.
    #[error("channel recv failed")]
    ChannelRecv,

    /// Anything else: bugs, invariant violations, unreachable states.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for fabric operations.
pub type Result<T> = std::result::Result<T, PlantdError>;

impl PlantdError {
    /// Build a [`PlantdError::Transport`] from any displayable cause.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Build a [`PlantdError::MalformedMessage`].
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Build a [`PlantdError::ProtocolViolation`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Build a [`PlantdError::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Build a [`PlantdError::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a caller may reasonably retry after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::ChannelSend | Self::ChannelRecv => false,
            _ => false,
        }
    }

    /// Whether this error reflects the underlying connection being gone.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ChannelSend | Self::ChannelRecv)
    }
}

impl From<flume::RecvError> for PlantdError {
    fn from(_: flume::RecvError) -> Self {
        Self::ChannelRecv
    }
}

impl<T> From<flume::SendError<T>> for PlantdError {
    fn from(_: flume::SendError<T>) -> Self {
        Self::ChannelSend
    }
}
