//! CoordinationClient: the guest side of the SCF protocol.
//!
//! Every exchange opens a fresh TCP connection, writes one request, reads one
//! response and closes. Long-running loops (connect-with-retry, heartbeat)
//! observe a shared cancellation flag at every suspension point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::NetworkError;
use crate::protocol::{self, ProtocolSet};
use crate::registry::{PlayerIdentity, PlayerProfile};
use crate::wire::{self, ScfRequest, ScfResponse};

/// Body sent by the liveness ping during connect-with-retry.
pub const PING_PAYLOAD: &[u8] = b"ping_test";

/// What the standard workflow learned about the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub game_port: u16,
    pub players: Vec<PlayerProfile>,
    pub protocols: ProtocolSet,
}

/// Cancels every pending and future operation of one client.
#[derive(Clone)]
pub struct ClientCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl ClientCanceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Periodic presence task. Stops when dropped.
pub struct HeartbeatHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ClientShared {
    addr: SocketAddr,
    config: ClientConfig,
    identity: PlayerIdentity,
    supported: RwLock<ProtocolSet>,
    last_players: Mutex<Vec<PlayerProfile>>,
    cancel: Arc<watch::Sender<bool>>,
}

/// Client for one coordination server.
pub struct CoordinationClient {
    shared: Arc<ClientShared>,
    heartbeat: Option<HeartbeatHandle>,
}

impl CoordinationClient {
    pub fn new(addr: SocketAddr, identity: PlayerIdentity, config: ClientConfig) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            shared: Arc::new(ClientShared {
                addr,
                config,
                identity,
                supported: RwLock::new(ProtocolSet::standard()),
                last_players: Mutex::new(Vec::new()),
                cancel: Arc::new(cancel),
            }),
            heartbeat: None,
        }
    }

    /// Replace the protocols this client claims during negotiation.
    pub fn with_protocols(self, supported: ProtocolSet) -> Self {
        *self.shared.supported.write() = supported;
        self
    }

    /// Protocols this client claims during negotiation.
    pub fn supported_protocols(&self) -> ProtocolSet {
        self.shared.supported.read().clone()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn identity(&self) -> &PlayerIdentity {
        &self.shared.identity
    }

    /// A handle that aborts this client's operations from another task.
    pub fn canceller(&self) -> ClientCanceller {
        ClientCanceller {
            tx: Arc::clone(&self.shared.cancel),
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Player list from the most recent successful fetch.
    pub fn last_players(&self) -> Vec<PlayerProfile> {
        self.shared.last_players.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Single exchanges
    // -----------------------------------------------------------------------

    /// Send one request on a fresh connection and read the response.
    pub async fn request(&self, request: ScfRequest) -> Result<ScfResponse, NetworkError> {
        self.shared.request(request).await
    }

    /// `c:ping`, checking the echo matches.
    pub async fn ping(&self, payload: &[u8]) -> Result<(), NetworkError> {
        self.shared.ping(payload).await
    }

    /// `c:player_ping` with this client's identity.
    pub async fn send_player_ping(&self) -> Result<(), NetworkError> {
        self.shared.send_player_ping().await
    }

    /// `c:protocols`. Returns the protocols both sides support.
    pub async fn negotiate_protocols(&self) -> Result<ProtocolSet, NetworkError> {
        let supported = self.supported_protocols();
        let response = self
            .request(ScfRequest::new(protocol::PROTOCOLS, supported.encode()))
            .await?;
        let served = ProtocolSet::decode(&response.into_result()?);
        let common = supported.intersection(&served);
        if common.is_empty() {
            return Err(NetworkError::NoCommonProtocol);
        }
        debug!("Negotiated protocols {common}");
        Ok(common)
    }

    /// `c:server_port`. Fails with [`NetworkError::GameServerNotReady`] on
    /// status 32.
    pub async fn server_port(&self) -> Result<u16, NetworkError> {
        let body = self
            .request(ScfRequest::empty(protocol::SERVER_PORT))
            .await?
            .into_result()?;
        let bytes: [u8; 2] = body.as_slice().try_into().map_err(|_| {
            NetworkError::ProtocolMalformed(format!("server port body is {} bytes", body.len()))
        })?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// `c:player_profiles_list`. Caches the result for [`last_players`](Self::last_players).
    pub async fn player_profiles(&self) -> Result<Vec<PlayerProfile>, NetworkError> {
        self.shared.player_profiles().await
    }

    // -----------------------------------------------------------------------
    // Workflow
    // -----------------------------------------------------------------------

    /// Retry a TCP connect plus `c:ping` until the server answers. Errors that
    /// cannot clear up on their own end the loop early.
    pub async fn connect_with_retry(&self) -> Result<(), NetworkError> {
        let shared = &self.shared;
        let attempts = shared.config.connect_attempts.max(1);

        for attempt in 1..=attempts {
            match shared.try_reach().await {
                Ok(()) => {
                    info!("Coordination server {} reachable (attempt {attempt})", shared.addr);
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    debug!("Giving up on {}: {e}", shared.addr);
                    return Err(e);
                }
                Err(e) => {
                    debug!("Attempt {attempt}/{attempts} to {} failed: {e}", shared.addr);
                }
            }
            if attempt < attempts {
                shared.sleep(shared.config.retry_delay).await?;
            }
        }

        warn!("Coordination server {} unreachable after {attempts} attempts", shared.addr);
        Err(NetworkError::Unreachable { attempts })
    }

    /// Connect, announce ourselves, negotiate protocols and start the
    /// heartbeat. Returns the common protocol set.
    pub async fn connect(&mut self) -> Result<ProtocolSet, NetworkError> {
        self.connect_with_retry().await?;

        self.send_player_ping().await.map_err(|e| match e {
            NetworkError::Cancelled => NetworkError::Cancelled,
            other => NetworkError::HeartbeatRejected(other.to_string()),
        })?;

        let protocols = self.negotiate_protocols().await?;
        self.start_heartbeat();
        Ok(protocols)
    }

    /// Connect, then fetch the game port and the player list.
    pub async fn run_standard_workflow(&mut self) -> Result<SessionInfo, NetworkError> {
        let result: Result<SessionInfo, NetworkError> = async {
            let protocols = self.connect().await?;
            let game_port = self.server_port().await?;
            let players = self.player_profiles().await?;
            Ok(SessionInfo {
                game_port,
                players,
                protocols,
            })
        }
        .await;

        if let Err(e) = &result {
            warn!("Standard workflow against {} failed: {e}", self.shared.addr);
            self.heartbeat = None;
        }
        result
    }

    /// Start the periodic `c:player_ping` + `c:player_profiles_list` loop.
    /// Restarts it if already running.
    pub fn start_heartbeat(&mut self) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            heartbeat_loop(shared, stop_rx).await;
        });
        self.heartbeat = Some(HeartbeatHandle {
            stop_tx,
            task: Some(task),
        });
    }

    /// Stop the heartbeat. The client stays usable for single exchanges.
    pub async fn disconnect(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
            info!("Disconnected from coordination server {}", self.shared.addr);
        }
    }
}

impl ClientShared {
    async fn request(&self, request: ScfRequest) -> Result<ScfResponse, NetworkError> {
        let mut cancel_rx = self.cancel.subscribe();
        tokio::select! {
            result = self.exchange(&request) => result,
            _ = cancelled(&mut cancel_rx) => Err(NetworkError::Cancelled),
        }
    }

    async fn exchange(&self, request: &ScfRequest) -> Result<ScfResponse, NetworkError> {
        let mut stream = self.open().await?;
        let io = async {
            wire::write_request(&mut stream, request).await?;
            wire::read_response(&mut stream).await
        };
        tokio::time::timeout(self.config.io_timeout, io)
            .await
            .map_err(|_| NetworkError::Timeout(self.config.io_timeout))?
    }

    async fn open(&self) -> Result<TcpStream, NetworkError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| NetworkError::Timeout(self.config.connect_timeout))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// One connect-with-retry attempt: bare TCP connect, then `c:ping`.
    async fn try_reach(&self) -> Result<(), NetworkError> {
        let mut cancel_rx = self.cancel.subscribe();
        tokio::select! {
            result = self.open() => { drop(result?); }
            _ = cancelled(&mut cancel_rx) => return Err(NetworkError::Cancelled),
        }
        self.ping(PING_PAYLOAD).await
    }

    async fn ping(&self, payload: &[u8]) -> Result<(), NetworkError> {
        let response = self
            .request(ScfRequest::new(protocol::PING, payload.to_vec()))
            .await?;
        let status = response.status;
        let body = response.into_result()?;
        if body != payload {
            return Err(NetworkError::Remote {
                status,
                message: "ping echo mismatch".into(),
            });
        }
        Ok(())
    }

    async fn send_player_ping(&self) -> Result<(), NetworkError> {
        let body = serde_json::to_vec(&self.identity)?;
        self.request(ScfRequest::new(protocol::PLAYER_PING, body))
            .await?
            .into_result()?;
        Ok(())
    }

    async fn player_profiles(&self) -> Result<Vec<PlayerProfile>, NetworkError> {
        let body = self
            .request(ScfRequest::empty(protocol::PLAYER_PROFILES_LIST))
            .await?
            .into_result()?;
        let players: Vec<PlayerProfile> = serde_json::from_slice(&body)?;
        *self.last_players.lock() = players.clone();
        Ok(players)
    }

    /// Sleep unless cancelled first.
    async fn sleep(&self, duration: Duration) -> Result<(), NetworkError> {
        let mut cancel_rx = self.cancel.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancelled(&mut cancel_rx) => Err(NetworkError::Cancelled),
        }
    }
}

async fn heartbeat_loop(shared: Arc<ClientShared>, mut stop_rx: watch::Receiver<bool>) {
    let period = shared.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cancel_rx = shared.cancel.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancelled(&mut stop_rx) => break,
            _ = cancelled(&mut cancel_rx) => break,
        }

        if let Err(e) = shared.send_player_ping().await {
            if matches!(e, NetworkError::Cancelled) {
                break;
            }
            warn!("Heartbeat to {} failed: {e}", shared.addr);
            continue;
        }
        match shared.player_profiles().await {
            Ok(players) => debug!("{} players online", players.len()),
            Err(NetworkError::Cancelled) => break,
            Err(e) => warn!("Player list from {} failed: {e}", shared.addr),
        }
    }
    debug!("Heartbeat to {} stopped", shared.addr);
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|&flag| flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
