/// Manifold Error Types
///
/// Error handling for all Manifold operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::endpoint::EndpointError;

/// Main error type for Manifold operations
#[derive(Error, Debug)]
pub enum ManifoldError {
    /// Endpoint validation or parsing failed
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A non-blocking send found no room (high-water-mark reached)
    #[error("operation would block")]
    WouldBlock,

    /// A bounded wait elapsed without the operation completing
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Socket was closed and can no longer be used
    #[error("socket closed")]
    SocketClosed,

    /// Programmer misuse of the API (contract violation, not a transient fault)
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A message needs at least one frame
    #[error("empty message")]
    EmptyMessage,

    /// Frame exceeds the transport's size cap
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Malformed data on the wire
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer disconnected
    #[error("peer disconnected: {0}")]
    PeerDisconnected(String),

    /// Subscription error
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Result type alias for Manifold operations
pub type Result<T> = std::result::Result<T, ManifoldError>;

impl ManifoldError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a peer disconnected error
    pub fn peer_disconnected(peer: impl Into<String>) -> Self {
        Self::PeerDisconnected(peer.into())
    }

    /// Check if this error means "nothing ready yet, try again".
    ///
    /// The subscriber's receive loop treats these as a normal idle tick
    /// rather than a fault.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WouldBlock | Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Check if this error indicates API misuse rather than a transport fault
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidOperation(_) | Self::SocketClosed | Self::EmptyMessage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ManifoldError::WouldBlock.is_transient());
        assert!(ManifoldError::Timeout(Duration::from_secs(7)).is_transient());
        assert!(ManifoldError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_transient());

        assert!(!ManifoldError::SocketClosed.is_transient());
        assert!(!ManifoldError::protocol("bad frame").is_transient());
    }

    #[test]
    fn test_misuse_classification() {
        assert!(ManifoldError::InvalidOperation("send on closed socket").is_misuse());
        assert!(ManifoldError::SocketClosed.is_misuse());
        assert!(!ManifoldError::WouldBlock.is_misuse());
    }
}
