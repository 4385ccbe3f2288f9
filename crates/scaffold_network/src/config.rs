//! Configuration for the coordination server, client, relay and LAN
//! announcer.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`CoordinationServer`](crate::server::CoordinationServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks an ephemeral port.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// Idle time after which a silent connection is closed.
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Listen on every interface at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

/// Configuration for a [`CoordinationClient`](crate::client::CoordinationClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-attempt TCP connect timeout.
    #[serde(with = "duration_millis_serde")]
    pub connect_timeout: Duration,

    /// Timeout for one request/response exchange.
    #[serde(with = "duration_millis_serde")]
    pub io_timeout: Duration,

    /// Attempts made by connect-with-retry before giving up.
    pub connect_attempts: usize,

    /// Delay between two connect attempts.
    #[serde(with = "duration_millis_serde")]
    pub retry_delay: Duration,

    /// Interval of the presence heartbeat.
    #[serde(with = "duration_millis_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(5),
            connect_attempts: 1000,
            retry_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`StreamRelay`](crate::relay::StreamRelay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local address accepting inbound connections.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// Remote address every inbound connection is paired with.
    #[serde(with = "socket_addr_serde")]
    pub target_addr: SocketAddr,

    /// Size of each pump's copy buffer.
    pub buffer_size: usize,

    /// Timeout for opening the outbound connection.
    #[serde(with = "duration_millis_serde")]
    pub connect_timeout: Duration,
}

impl RelayConfig {
    pub fn new(listen_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            target_addr,
            buffer_size: 4096,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`LanAnnouncer`](crate::announce::LanAnnouncer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceConfig {
    /// Text shown in the game's server list.
    pub motd: String,

    /// Local port the game client should connect to.
    pub port: u16,

    /// Multicast group and port the datagram is sent to.
    #[serde(with = "socket_addr_serde")]
    pub group: SocketAddr,

    /// Multicast TTL.
    pub ttl: u32,

    /// Time between two datagrams.
    #[serde(with = "duration_millis_serde")]
    pub interval: Duration,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            motd: "Scaffold room".into(),
            port: 25565,
            group: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(224, 0, 2, 60), 4445)),
            ttl: 2,
            interval: Duration::from_millis(500),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(dur.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.connect_attempts, 1000);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_server_with_port() {
        let config = ServerConfig::with_port(13448);
        assert_eq!(config.listen_addr.port(), 13448);
        assert!(config.listen_addr.ip().is_unspecified());
    }

    #[test]
    fn test_relay_defaults() {
        let config = RelayConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "10.144.144.1:25565".parse().unwrap(),
        );
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.target_addr.port(), 25565);
    }

    #[test]
    fn test_announce_defaults() {
        let config = AnnounceConfig::default();
        assert_eq!(config.group.to_string(), "224.0.2.60:4445");
        assert_eq!(config.ttl, 2);
        assert_eq!(config.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_server_config_serialize_roundtrip() {
        let config = ServerConfig::with_port(2048);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"0.0.0.0:2048\""));
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.listen_addr, config.listen_addr);
        assert_eq!(back.idle_timeout, config.idle_timeout);
    }
}
