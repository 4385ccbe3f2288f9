//! Finding the host's coordination port from mesh agent output.
//!
//! A host joins the overlay under the hostname `scaffolding-mc-server-<port>`.
//! Guests watch the agent's log for a line carrying that name, and fall back
//! to the agent's peer table when the log does not mention it.

use std::time::Duration;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::RoomError;
use crate::mesh::LogStream;

pub use scaffold_network::server::{HOST_HOSTNAME_PREFIX, host_hostname};

/// Agents print this when a peer joins the network.
pub const PEER_ADDED_MARKER: &str = "new peer added";

static HOST_HOSTNAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"scaffolding-mc-server-\d+").expect("host hostname pattern compiles")
});

/// The host as named on the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    pub hostname: String,
    pub port: u16,
}

impl HostEndpoint {
    pub fn from_hostname(hostname: &str) -> Option<Self> {
        Some(Self {
            port: parse_host_port(hostname)?,
            hostname: hostname.to_string(),
        })
    }
}

/// First host hostname appearing in `line`.
pub fn find_host_hostname(line: &str) -> Option<&str> {
    HOST_HOSTNAME_PATTERN.find(line).map(|m| m.as_str())
}

/// Coordination port encoded in a host hostname.
pub fn parse_host_port(hostname: &str) -> Option<u16> {
    let parts: Vec<&str> = hostname.trim().split('-').collect();
    if parts.len() != 4 || !hostname.trim().starts_with(HOST_HOSTNAME_PREFIX) {
        return None;
    }
    parts[3].parse().ok()
}

/// Hostname of an online host in a `|`-separated peer table.
///
/// The hostname is the third column. Rows marked `offline` are ignored.
pub fn find_host_in_peer_table(table: &str) -> Option<String> {
    table
        .lines()
        .filter(|row| row.contains(HOST_HOSTNAME_PREFIX) && !row.contains("offline"))
        .find_map(|row| {
            let hostname = row.split('|').nth(2)?.trim();
            parse_host_port(hostname).map(|_| hostname.to_string())
        })
}

/// Read `logs` until a peer-join line names the host.
///
/// Fails with [`RoomError::HostDiscoveryTimeout`] when `timeout` passes
/// first, and with [`RoomError::HostNotFound`] when the stream ends.
pub async fn wait_for_host(logs: &mut LogStream, timeout: Duration) -> Result<HostEndpoint, RoomError> {
    let scan = async {
        while let Some(line) = logs.next().await {
            if !line.contains(PEER_ADDED_MARKER) {
                continue;
            }
            debug!("Peer joined: {line}");
            if let Some(endpoint) = find_host_hostname(&line).and_then(HostEndpoint::from_hostname) {
                info!("Found host {} on port {}", endpoint.hostname, endpoint.port);
                return Ok(endpoint);
            }
        }
        Err(RoomError::HostNotFound)
    };

    tokio::time::timeout(timeout, scan)
        .await
        .map_err(|_| RoomError::HostDiscoveryTimeout(timeout))?
}
