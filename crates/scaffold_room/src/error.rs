//! Room orchestration errors.

use std::time::Duration;

use scaffold_core::CodeError;
use scaffold_network::NetworkError;

/// Errors that can occur while opening, joining or leaving a room.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room code is malformed or could not be generated.
    #[error(transparent)]
    Code(#[from] CodeError),

    /// A coordination or relay operation failed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The mesh agent failed to start, stop or report.
    #[error("Mesh agent error: {0}")]
    Mesh(String),

    /// The mesh agent's output ended without naming a host.
    #[error("Host not found in mesh agent output")]
    HostNotFound,

    /// No host appeared within the discovery window.
    #[error("No host discovered within {0:?}")]
    HostDiscoveryTimeout(Duration),

    /// Another join is being set up right now.
    #[error("Room setup already in progress")]
    SetupInProgress,

    /// This guest is already in a room.
    #[error("Already joined a room")]
    AlreadyJoined,

    /// `leave` was called without a joined room.
    #[error("Not in a room")]
    NotJoined,
}

impl From<std::io::Error> for RoomError {
    fn from(e: std::io::Error) -> Self {
        Self::Network(NetworkError::Io(e))
    }
}
