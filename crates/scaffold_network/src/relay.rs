//! StreamRelay: pairs each inbound TCP connection with a fresh outbound
//! connection to a fixed target and copies bytes both ways.
//!
//! Each pair runs two pumps on its own task. When either pump sees EOF or an
//! error, both are dropped, which closes both sockets. Pairs are isolated:
//! one failing never touches another.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::NetworkError;

/// What ended a relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    Inbound,
    Outbound,
    /// The relay was stopped, possibly before the target answered.
    Shutdown,
}

/// A running TCP relay.
pub struct StreamRelay {
    config: RelayConfig,
    local_addr: Option<SocketAddr>,
    active: Arc<AtomicUsize>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl StreamRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            local_addr: None,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx: None,
            accept_task: None,
        }
    }

    /// Bind the listener and start relaying. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, NetworkError> {
        if let Some(addr) = self.local_addr.filter(|_| self.shutdown_tx.is_some()) {
            return Ok(addr);
        }
        if self.config.buffer_size == 0 {
            return Err(NetworkError::InvalidArgument("relay buffer size is 0".into()));
        }

        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let config = self.config.clone();
        let active = Arc::clone(&self.active);
        let pair_shutdown = shutdown_tx.clone();
        self.accept_task = Some(tokio::spawn(async move {
            accept_loop(listener, config, active, shutdown_rx, pair_shutdown).await;
        }));
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(addr);

        info!("Relay {addr} -> {} started", self.config.target_addr);
        Ok(addr)
    }

    /// Stop accepting and close every relayed connection.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("Relay accept loop panicked: {e}");
            }
        }
        if let Some(addr) = self.local_addr {
            info!("Relay {addr} -> {} stopped", self.config.target_addr);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn target_addr(&self) -> SocketAddr {
        self.config.target_addr
    }

    /// Relayed connections currently open.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for StreamRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: RelayConfig,
    active: Arc<AtomicUsize>,
    mut shutdown: broadcast::Receiver<()>,
    pair_shutdown: broadcast::Sender<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((inbound, peer)) => {
                        let config = config.clone();
                        let active = Arc::clone(&active);
                        let shutdown = pair_shutdown.subscribe();
                        tokio::spawn(async move {
                            active.fetch_add(1, Ordering::SeqCst);
                            match relay_connection(inbound, peer, &config, shutdown).await {
                                Ok(end) => debug!("Relay for {peer} closed by {end:?} side"),
                                Err(e) => warn!("Relay for {peer} failed: {e}"),
                            }
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => warn!("Relay accept error: {e}"),
                }
            }
            _ = shutdown.recv() => {
                debug!("Relay accept loop shutting down");
                break;
            }
        }
    }
}

async fn relay_connection(
    inbound: TcpStream,
    peer: SocketAddr,
    config: &RelayConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<RelayEnd, NetworkError> {
    let connect = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.target_addr));
    let outbound = tokio::select! {
        connected = connect => {
            connected.map_err(|_| NetworkError::Timeout(config.connect_timeout))??
        }
        _ = shutdown.recv() => return Ok(RelayEnd::Shutdown),
    };
    debug!("Relaying {peer} <-> {}", config.target_addr);
    inbound.set_nodelay(true)?;
    outbound.set_nodelay(true)?;

    let (mut in_read, mut in_write) = inbound.into_split();
    let (mut out_read, mut out_write) = outbound.into_split();

    // Dropping the halves at the end of this scope closes both sockets.
    let end = tokio::select! {
        _ = pump(&mut in_read, &mut out_write, config.buffer_size) => RelayEnd::Inbound,
        _ = pump(&mut out_read, &mut in_write, config.buffer_size) => RelayEnd::Outbound,
        _ = shutdown.recv() => RelayEnd::Shutdown,
    };
    let _ = in_write.shutdown().await;
    let _ = out_write.shutdown().await;
    Ok(end)
}

/// Copy until EOF or error. Returns the number of bytes moved.
async fn pump<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Relay read error: {e}");
                break;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!("Relay write error: {e}");
            break;
        }
        total += n as u64;
    }
    total
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_copies_until_eof() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = &data[..];
        let mut out = Vec::new();
        let moved = pump(&mut reader, &mut out, 4096).await;
        assert_eq!(moved, 10_000);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_rejects_zero_buffer() {
        let mut config = RelayConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        );
        config.buffer_size = 0;
        let mut relay = StreamRelay::new(config);
        assert!(matches!(
            relay.start().await,
            Err(NetworkError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_target_closes_inbound() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let mut relay = StreamRelay::new(RelayConfig::new("127.0.0.1:0".parse().unwrap(), dead_addr));
        let addr = relay.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_connect() {
        // TEST-NET-1 never answers, so the outbound connect hangs or fails.
        let mut config = RelayConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            "192.0.2.1:9".parse().unwrap(),
        );
        config.connect_timeout = std::time::Duration::from_secs(60);
        let mut relay = StreamRelay::new(config);
        let addr = relay.start().await.unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        relay.stop().await;

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while relay.active_connections() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pending connect should end with the relay");
    }
}
