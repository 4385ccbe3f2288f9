//! LAN announcement of a relayed game port.
//!
//! Game clients list LAN worlds by listening for
//! `[MOTD]<text>[/MOTD][AD]<port>[/AD]` datagrams on `224.0.2.60:4445`.
//! A guest re-advertises its local relay port this way so the room shows up
//! in the client's server list.

use std::net::{Ipv4Addr, SocketAddr};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::AnnounceConfig;
use crate::error::NetworkError;

static ANNOUNCEMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[MOTD\](.*?)\[/MOTD\]\[AD\](\d{1,5})\[/AD\]").expect("announcement pattern compiles")
});

/// `[MOTD]<motd>[/MOTD][AD]<port>[/AD]`
pub fn format_announcement(motd: &str, port: u16) -> String {
    format!("[MOTD]{motd}[/MOTD][AD]{port}[/AD]")
}

/// Extract `(motd, port)` from an announcement datagram.
pub fn parse_announcement(text: &str) -> Option<(String, u16)> {
    let caps = ANNOUNCEMENT_PATTERN.captures(text)?;
    let port = caps.get(2)?.as_str().parse().ok()?;
    Some((caps.get(1)?.as_str().to_string(), port))
}

/// Background task sending the announcement at a fixed interval.
pub struct LanAnnouncer {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl LanAnnouncer {
    pub async fn start(config: AnnounceConfig) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket.set_multicast_ttl_v4(config.ttl)?;

        let payload = format_announcement(&config.motd, config.port).into_bytes();
        let (shutdown_tx, mut shutdown) = broadcast::channel(1);
        let group = config.group;
        let interval = config.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match socket.send_to(&payload, group).await {
                            Ok(_) => trace!("LAN announcement sent to {group}"),
                            Err(e) => debug!("LAN announcement send failed: {e}"),
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("LAN announcer shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            "Announcing port {} as \"{}\" to {}",
            config.port, config.motd, config.group
        );
        Ok(Self {
            shutdown_tx,
            task: Some(task),
        })
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LanAnnouncer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_and_parse() {
        let text = format_announcement("Steve's room", 50123);
        assert_eq!(text, "[MOTD]Steve's room[/MOTD][AD]50123[/AD]");
        assert_eq!(
            parse_announcement(&text),
            Some(("Steve's room".to_string(), 50123))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_announcement("hello"), None);
        assert_eq!(parse_announcement("[MOTD]x[/MOTD][AD]99999[/AD]"), None);
        assert_eq!(parse_announcement("[MOTD]x[/MOTD][AD][/AD]"), None);
    }

    #[tokio::test]
    async fn test_announcer_sends_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = AnnounceConfig {
            motd: "test".into(),
            port: 40000,
            group: receiver.local_addr().unwrap(),
            ttl: 1,
            interval: Duration::from_millis(20),
        };
        let announcer = LanAnnouncer::start(config).await.unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert_eq!(parse_announcement(text), Some(("test".to_string(), 40000)));

        announcer.stop().await;
    }
}
