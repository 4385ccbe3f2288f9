//! CoordinationServer: the host-side SCF endpoint.
//!
//! The accept loop runs on its own task; every accepted connection gets an
//! independent task that reads a request, dispatches it, and writes the
//! response, strictly in order, until the peer goes away.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::NetworkError;
use crate::registry::{HostInfo, PlayerEntry, PlayerProfile, PlayerRegistry};
use crate::router::{ProtocolHandler, ProtocolRouter};
use crate::wire;

/// Hostname prefix a host advertises inside the mesh.
pub const HOST_HOSTNAME_PREFIX: &str = "scaffolding-mc-server-";

/// Lowest port a server may be configured with, besides 0.
pub const MIN_SERVER_PORT: u16 = 1025;

/// Vendor recorded for hosts installed with [`CoordinationServer::force_set_host`].
pub const FORCED_HOST_VENDOR: &str = "host";

/// `scaffolding-mc-server-<port>`
pub fn host_hostname(port: u16) -> String {
    format!("{HOST_HOSTNAME_PREFIX}{port}")
}

/// Reject ports below 1025. Port 0 (ephemeral) is allowed.
pub fn validate_port(port: u16) -> Result<(), NetworkError> {
    if port != 0 && port < MIN_SERVER_PORT {
        return Err(NetworkError::InvalidArgument(format!(
            "port must be 0 or in {MIN_SERVER_PORT}-65535, got {port}"
        )));
    }
    Ok(())
}

/// A fresh random host machine id drawn from `rng`.
pub fn generate_host_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let uuid = uuid::Builder::from_random_bytes(rng.random()).into_uuid();
    format!("host-{}", uuid.simple())
}

// ---------------------------------------------------------------------------
// Game service status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct GameState {
    port: u16,
    running: bool,
}

/// Port and liveness of the game service the host advertises.
#[derive(Debug)]
pub struct GameServerStatus {
    state: Mutex<GameState>,
}

impl GameServerStatus {
    pub fn new(port: u16, running: bool) -> Self {
        Self {
            state: Mutex::new(GameState { port, running }),
        }
    }

    pub fn set(&self, port: u16, running: bool) {
        *self.state.lock() = GameState { port, running };
    }

    pub fn set_running(&self, running: bool) {
        self.state.lock().running = running;
    }

    pub fn port(&self) -> u16 {
        self.state.lock().port
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// The port, only while the game service is running.
    pub fn port_if_running(&self) -> Option<u16> {
        let state = *self.state.lock();
        state.running.then_some(state.port)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The coordination server.
///
/// Create one per hosted room. Call [`start()`](CoordinationServer::start) to
/// bind and begin accepting connections.
pub struct CoordinationServer {
    config: ServerConfig,
    registry: Arc<PlayerRegistry>,
    game: Arc<GameServerStatus>,
    router: Arc<ProtocolRouter>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl CoordinationServer {
    pub fn new(config: ServerConfig) -> Result<Self, NetworkError> {
        validate_port(config.listen_addr.port())?;

        let registry = Arc::new(PlayerRegistry::new());
        let game = Arc::new(GameServerStatus::new(0, false));
        let router = ProtocolRouter::standard(Arc::clone(&registry), Arc::clone(&game));

        Ok(Self {
            config,
            registry,
            game,
            router,
            local_addr: None,
            shutdown_tx: None,
            accept_task: None,
        })
    }

    /// A server listening on every interface at `port`.
    pub fn with_port(port: u16) -> Result<Self, NetworkError> {
        Self::new(ServerConfig::with_port(port))
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The bound port once started, the configured port before.
    pub fn port(&self) -> u16 {
        self.local_addr
            .map_or(self.config.listen_addr.port(), |addr| addr.port())
    }

    /// `scaffolding-mc-server-<port>`
    pub fn hostname(&self) -> String {
        host_hostname(self.port())
    }

    pub fn registry(&self) -> &Arc<PlayerRegistry> {
        &self.registry
    }

    pub fn game(&self) -> &Arc<GameServerStatus> {
        &self.game
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn start(&mut self) -> Result<SocketAddr, NetworkError> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let router = Arc::clone(&self.router);
        let idle_timeout = self.config.idle_timeout;
        self.accept_task = Some(tokio::spawn(async move {
            accept_loop(listener, router, idle_timeout, shutdown_rx).await;
        }));
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(addr);

        info!("Coordination server listening on {addr} ({})", self.hostname());
        Ok(addr)
    }

    /// Stop accepting and close the listening socket. Connections already
    /// accepted end on their next read failure.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("Accept loop panicked: {e}");
            }
        }
        if self.local_addr.is_some() {
            info!("Coordination server on port {} stopped", self.port());
        }
    }

    /// Serve an extra protocol. It is advertised through `c:protocols`.
    pub fn register_protocol(&self, id: &str, handler: ProtocolHandler) -> Result<(), NetworkError> {
        self.router.register(id, handler)
    }

    // -----------------------------------------------------------------------
    // Game service
    // -----------------------------------------------------------------------

    pub fn set_game_server(&self, port: u16, running: bool) {
        self.game.set(port, running);
        info!("Game service port {port}, running: {running}");
    }

    pub fn set_game_running(&self, running: bool) {
        self.game.set_running(running);
    }

    // -----------------------------------------------------------------------
    // Host management
    // -----------------------------------------------------------------------

    /// Install the host. A missing `machine_id` is generated from `rng`.
    /// Returns the host's machine id.
    pub fn set_host<R: Rng + ?Sized>(
        &self,
        name: &str,
        machine_id: Option<&str>,
        vendor: &str,
        rng: &mut R,
    ) -> Result<String, NetworkError> {
        let name = non_blank(name, "host name")?;
        let machine_id = match machine_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id.to_string(),
            None => generate_host_id(rng),
        };
        self.registry.set_host(name, &machine_id, vendor, Utc::now());
        Ok(machine_id)
    }

    /// Install a generated host named `name` unless a host exists.
    pub fn set_host_if_absent<R: Rng + ?Sized>(&self, name: &str, vendor: &str, rng: &mut R) -> bool {
        let machine_id = generate_host_id(rng);
        self.registry
            .set_host_if_absent(name, &machine_id, vendor, Utc::now())
    }

    /// Hand the host role to a player already in the registry.
    pub fn transfer_host(&self, machine_id: &str) -> bool {
        self.registry.transfer_host(machine_id)
    }

    /// Make `machine_id` host even if it has never pinged.
    pub fn force_set_host(&self, name: &str, machine_id: &str) -> Result<(), NetworkError> {
        let name = non_blank(name, "host name")?;
        let machine_id = non_blank(machine_id, "machine id")?;
        self.registry
            .force_set_host(name, machine_id, FORCED_HOST_VENDOR, Utc::now());
        Ok(())
    }

    pub fn remove_host_status(&self) {
        self.registry.remove_host_status();
    }

    pub fn host(&self) -> Option<HostInfo> {
        self.registry.host()
    }

    pub fn is_host(&self, machine_id: &str) -> bool {
        self.registry.is_host(machine_id)
    }

    pub fn player(&self, machine_id: &str) -> Option<PlayerEntry> {
        self.registry.get(machine_id)
    }

    pub fn players(&self) -> Vec<PlayerProfile> {
        self.registry.players()
    }

    pub fn player_count(&self) -> usize {
        self.registry.player_count()
    }
}

impl Drop for CoordinationServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str, NetworkError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NetworkError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Internal tasks
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    router: Arc<ProtocolRouter>,
    idle_timeout: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted coordination connection from {addr}");
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            handle_connection(stream, addr, router, idle_timeout).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("Coordination accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: Arc<ProtocolRouter>,
    idle_timeout: std::time::Duration,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request = match tokio::time::timeout(idle_timeout, wire::read_request(&mut reader)).await {
            Ok(Ok(request)) => request,
            Ok(Err(NetworkError::TransportClosed)) => {
                debug!("{addr} closed the connection");
                break;
            }
            Ok(Err(e)) => {
                debug!("Dropping connection from {addr}: {e}");
                break;
            }
            Err(_) => {
                debug!("Closing idle connection from {addr}");
                break;
            }
        };

        debug!("{addr} -> {} ({} bytes)", request.protocol, request.body.len());
        let response = router.dispatch(request).await;
        if let Err(e) = wire::write_response(&mut writer, &response).await {
            debug!("Failed to answer {addr}: {e}");
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn loopback() -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_port_validation() {
        assert!(CoordinationServer::with_port(0).is_ok());
        assert!(CoordinationServer::with_port(1025).is_ok());
        assert!(CoordinationServer::with_port(65535).is_ok());
        assert!(matches!(
            CoordinationServer::with_port(1024),
            Err(NetworkError::InvalidArgument(_))
        ));
        assert!(CoordinationServer::with_port(80).is_err());
    }

    #[test]
    fn test_hostname_uses_configured_port() {
        let server = CoordinationServer::with_port(13448).unwrap();
        assert_eq!(server.hostname(), "scaffolding-mc-server-13448");
        assert!(!server.is_running());
    }

    #[test]
    fn test_host_ids_follow_rng() {
        let a = generate_host_id(&mut StdRng::seed_from_u64(3));
        let b = generate_host_id(&mut StdRng::seed_from_u64(3));
        let c = generate_host_id(&mut StdRng::seed_from_u64(4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("host-"));
    }

    #[test]
    fn test_host_management() {
        let server = CoordinationServer::new(loopback()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        assert!(server.set_host(" ", None, "v", &mut rng).is_err());
        let id = server.set_host(" Alice ", None, "v", &mut rng).unwrap();
        assert!(server.is_host(&id));
        assert_eq!(server.host().unwrap().name, "Alice");
        assert!(!server.set_host_if_absent("Other", "v", &mut rng));

        server.force_set_host("Bob", "bob").unwrap();
        assert!(server.is_host("bob"));
        assert_eq!(server.player("bob").unwrap().profile.vendor, FORCED_HOST_VENDOR);
        assert!(server.force_set_host("Bob", "").is_err());

        assert!(server.transfer_host(&id));
        assert!(!server.transfer_host("nobody"));
        assert_eq!(server.player_count(), 2);

        server.remove_host_status();
        assert!(server.host().is_none());
        assert!(server.set_host_if_absent("Fallback", "v", &mut rng));
        assert_eq!(server.host().unwrap().name, "Fallback");
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut server = CoordinationServer::new(loopback()).unwrap();
        let addr = server.start().await.unwrap();
        assert!(server.is_running());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.hostname(), format!("scaffolding-mc-server-{}", addr.port()));

        // Starting twice is a no-op.
        assert_eq!(server.start().await.unwrap(), addr);

        server.stop().await;
        assert!(!server.is_running());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_survives_bad_request() {
        use crate::wire::{ScfRequest, read_response, write_request};

        let mut server = CoordinationServer::new(loopback()).unwrap();
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_request(&mut stream, &ScfRequest::empty("Bad Id")).await.unwrap();
        let response = read_response(&mut stream).await.unwrap();
        assert_eq!(response.status, wire::STATUS_UNKNOWN_ERROR);

        write_request(&mut stream, &ScfRequest::new("c:ping", b"again".to_vec()))
            .await
            .unwrap();
        let response = read_response(&mut stream).await.unwrap();
        assert_eq!(response.status, wire::STATUS_OK);
        assert_eq!(response.body, b"again");

        server.stop().await;
    }
}
