//! Network error types.

use std::time::Duration;

/// Errors that can occur in the scaffold_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The connection closed part-way through a frame.
    #[error("Frame truncated: connection closed mid-frame")]
    FrameTruncated,

    /// The connection closed before a new frame began.
    #[error("Transport closed")]
    TransportClosed,

    /// A frame announced a body larger than the accepted maximum.
    #[error("Frame body too large: {0} bytes")]
    FrameTooLarge(u32),

    /// A protocol id failed validation.
    #[error("Malformed protocol id: {0}")]
    ProtocolMalformed(String),

    /// The remote side does not serve the requested protocol.
    #[error("Unsupported protocol: {0}")]
    ProtocolUnsupported(String),

    /// The remote side answered with a non-zero status.
    #[error("Remote error (status {status}): {message}")]
    Remote { status: u8, message: String },

    /// The host reports that its game service is not running.
    #[error("Game server not ready")]
    GameServerNotReady,

    /// Connect-with-retry gave up.
    #[error("Server unreachable after {attempts} attempts")]
    Unreachable { attempts: usize },

    /// Client and server share no protocol.
    #[error("No common protocol with server")]
    NoCommonProtocol,

    /// The initial presence heartbeat was refused.
    #[error("Heartbeat rejected: {0}")]
    HeartbeatRejected(String),

    /// A caller supplied an unusable value (port, protocol id, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The component has not been started.
    #[error("Not running")]
    NotRunning,

    /// The operation was cancelled by its owner.
    #[error("Cancelled")]
    Cancelled,

    /// An operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Whether the connection that produced this error must be abandoned.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::FrameTruncated
                | Self::TransportClosed
                | Self::FrameTooLarge(_)
                | Self::Io(_)
                | Self::Timeout(_)
        )
    }

    /// Whether repeating the whole exchange later may succeed.
    ///
    /// Lost connections and a game that is still starting are transient.
    /// Protocol disagreements and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        self.is_connection_lost()
            || matches!(
                self,
                Self::Unreachable { .. } | Self::GameServerNotReady | Self::Remote { .. }
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_is_retryable() {
        assert!(NetworkError::TransportClosed.is_connection_lost());
        assert!(NetworkError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(NetworkError::Unreachable { attempts: 3 }.is_retryable());
        assert!(NetworkError::GameServerNotReady.is_retryable());
        assert!(!NetworkError::GameServerNotReady.is_connection_lost());
    }

    #[test]
    fn test_protocol_disagreement_is_final() {
        for err in [
            NetworkError::ProtocolUnsupported("c:protocols".into()),
            NetworkError::ProtocolMalformed("c:".into()),
            NetworkError::NoCommonProtocol,
            NetworkError::HeartbeatRejected("bad identity".into()),
            NetworkError::Cancelled,
        ] {
            assert!(!err.is_retryable(), "{err} should not be retried");
        }
    }
}
