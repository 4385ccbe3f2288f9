//! The overlay-mesh agent as seen by the orchestrator.
//!
//! Rooms never depend on a particular agent's command line. An agent is
//! anything that can join a named network and hand back a [`MeshHandle`]:
//! a liveness check, a stream of its log lines, and a way to stop it.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RoomError;

/// Lines printed by a running mesh agent, in order.
pub type LogStream = BoxStream<'static, String>;

/// Forward `local` on this machine to `remote` inside the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForward {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl fmt::Display for PortForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// Per-start settings for the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshOptions {
    /// Hostname other peers see. Hosts set this to their server hostname.
    pub hostname: Option<String>,
    /// Fixed overlay address. `None` lets the agent choose.
    pub ipv4: Option<Ipv4Addr>,
    pub port_forwards: Vec<PortForward>,
}

impl MeshOptions {
    pub fn host(hostname: impl Into<String>, ipv4: Ipv4Addr) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ipv4: Some(ipv4),
            port_forwards: Vec::new(),
        }
    }

    pub fn with_forward(mut self, forward: PortForward) -> Self {
        self.port_forwards.push(forward);
        self
    }
}

/// Starts mesh agent instances.
#[async_trait]
pub trait MeshAgent: Send + Sync {
    /// Join `network_name` using `network_secret`.
    async fn start(
        &self,
        network_name: &str,
        network_secret: &str,
        options: &MeshOptions,
    ) -> Result<Box<dyn MeshHandle>, RoomError>;
}

/// A running mesh agent.
#[async_trait]
pub trait MeshHandle: Send {
    fn is_alive(&mut self) -> bool;

    /// The agent's log lines. Yields `Some` once; later calls return `None`.
    fn take_logs(&mut self) -> Option<LogStream>;

    /// Current peer table in the agent's `|`-separated text form, if the
    /// agent can report one.
    async fn peer_table(&mut self) -> Result<Option<String>, RoomError> {
        Ok(None)
    }

    async fn stop(&mut self) -> Result<(), RoomError>;
}

/// Copies an agent's log lines into tracing under the `mesh` target so the
/// agent never blocks on a full output pipe. Stops when dropped.
pub struct LogDrain {
    task: JoinHandle<()>,
}

impl LogDrain {
    pub fn spawn(mut logs: LogStream) -> Self {
        let task = tokio::spawn(async move {
            while let Some(line) = logs.next().await {
                debug!(target: "mesh", "{line}");
            }
            debug!(target: "mesh", "agent output closed");
        });
        Self { task }
    }

    /// True once the agent's output ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LogDrain {
    fn drop(&mut self) {
        self.task.abort();
    }
}
