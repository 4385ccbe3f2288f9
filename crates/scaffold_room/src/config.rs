//! Orchestration settings for hosting and joining rooms.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use scaffold_core::ScaffoldConfig;
use scaffold_network::ClientConfig;

/// How a guest reaches the host's coordination port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForwardingMode {
    /// Restart the mesh agent with a port-forward to the host.
    MeshForward,
    /// Keep the agent running and relay a local port over the overlay.
    #[default]
    Relay,
}

/// Range the host draws its coordination port from when none is fixed.
pub const COORDINATION_PORT_RANGE: std::ops::Range<u16> = 10000..60000;

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub player_name: String,
    pub vendor: String,
    pub machine_id: Option<String>,

    /// Overlay address the host pins itself to; guests dial it.
    pub host_overlay_ip: Ipv4Addr,
    /// Game service port the host advertises.
    pub game_port: u16,
    /// Fixed coordination port. `None` draws one from [`COORDINATION_PORT_RANGE`].
    pub coordination_port: Option<u16>,
    /// Interface the host's coordination server binds.
    pub coordination_bind: IpAddr,

    /// How long a guest waits for the host to show up.
    pub discovery_timeout: Duration,
    pub forwarding: ForwardingMode,
    /// Local port for the coordination proxy. 0 picks one.
    pub local_coordination_port: u16,
    /// Local port game clients connect to. 0 picks one.
    pub local_game_port: u16,
    /// Standard-workflow runs before a join gives up.
    pub workflow_attempts: usize,
    pub workflow_retry_delay: Duration,
    /// Advertise the local game port on the LAN.
    pub announce_lan: bool,

    pub client: ClientConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::from_app_config(&ScaffoldConfig::default())
    }
}

impl RoomConfig {
    /// Derive orchestration settings from the persisted app config.
    pub fn from_app_config(app: &ScaffoldConfig) -> Self {
        let client = ClientConfig {
            heartbeat_interval: Duration::from_secs(app.heartbeat_interval_secs.max(1)),
            ..ClientConfig::default()
        };
        Self {
            player_name: app.player_name.clone(),
            vendor: app.vendor.clone(),
            machine_id: app.machine_id.clone(),
            host_overlay_ip: app.host_overlay_ip,
            game_port: app.game_port,
            coordination_port: app.coordination_port,
            coordination_bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            discovery_timeout: Duration::from_secs(30),
            forwarding: ForwardingMode::default(),
            local_coordination_port: 0,
            local_game_port: 0,
            workflow_attempts: 3,
            workflow_retry_delay: Duration::from_secs(3),
            announce_lan: true,
            client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RoomConfig::default();
        assert_eq!(config.discovery_timeout, Duration::from_secs(30));
        assert_eq!(config.forwarding, ForwardingMode::Relay);
        assert_eq!(config.host_overlay_ip, Ipv4Addr::new(10, 144, 144, 1));
        assert_eq!(config.workflow_attempts, 3);
        assert_eq!(config.client.connect_attempts, 1000);
    }

    #[test]
    fn test_from_app_config() {
        let mut app = ScaffoldConfig::default();
        app.player_name = "Steve".into();
        app.game_port = 25566;
        app.coordination_port = Some(13448);
        app.heartbeat_interval_secs = 0;

        let config = RoomConfig::from_app_config(&app);
        assert_eq!(config.player_name, "Steve");
        assert_eq!(config.game_port, 25566);
        assert_eq!(config.coordination_port, Some(13448));
        assert_eq!(config.client.heartbeat_interval, Duration::from_secs(1));
    }
}
