//! Joining a room as a guest.
//!
//! A join walks through: start the mesh agent, find the host's hostname in
//! the agent's output, expose the host's coordination port locally, run the
//! client workflow, then expose the game port and advertise it on the LAN.
//! Any failure tears down what was started and leaves the guest idle.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use scaffold_core::RoomCode;
use scaffold_network::identity::player_identity;
use scaffold_network::{
    AnnounceConfig, CoordinationClient, LanAnnouncer, NetworkError, RelayConfig, SessionInfo,
    StreamRelay,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ForwardingMode, RoomConfig};
use crate::discovery::{self, HostEndpoint};
use crate::error::RoomError;
use crate::mesh::{LogDrain, LogStream, MeshAgent, MeshHandle, MeshOptions, PortForward};
use crate::setup::{SetupGuard, SetupState};

/// What a successful join produced.
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub code: RoomCode,
    pub host: HostEndpoint,
    /// Where the local game client should connect.
    pub game_addr: SocketAddr,
    pub session: SessionInfo,
}

struct GuestSession {
    joined: JoinedRoom,
    mesh: Box<dyn MeshHandle>,
    log_drain: Option<LogDrain>,
    client: CoordinationClient,
    coordination_relay: Option<StreamRelay>,
    game_relay: StreamRelay,
    announcer: Option<LanAnnouncer>,
}

/// The guest side of a room. Holds at most one joined room.
pub struct GuestRoom {
    config: RoomConfig,
    agent: Arc<dyn MeshAgent>,
    setup: SetupGuard,
    session: Mutex<Option<GuestSession>>,
}

impl GuestRoom {
    pub fn new(config: RoomConfig, agent: Arc<dyn MeshAgent>) -> Self {
        Self {
            config,
            agent,
            setup: SetupGuard::new(),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SetupState {
        self.setup.state()
    }

    /// Summary of the current room, if joined.
    pub async fn joined(&self) -> Option<JoinedRoom> {
        self.session.lock().await.as_ref().map(|s| s.joined.clone())
    }

    /// Join the room named by `code`.
    pub async fn join(&self, code: &str) -> Result<JoinedRoom, RoomError> {
        let code = RoomCode::parse(code)?;
        let ticket = self.setup.try_begin()?;

        info!("Joining room {code}");
        let session = self.establish(&code).await?;
        let joined = session.joined.clone();
        *self.session.lock().await = Some(session);
        ticket.complete();

        info!(
            "Joined room {code}: game at {}, {} player(s) online",
            joined.game_addr,
            joined.session.players.len()
        );
        Ok(joined)
    }

    /// Leave the current room and stop everything the join started.
    pub async fn leave(&self) -> Result<(), RoomError> {
        let session = self.session.lock().await.take().ok_or(RoomError::NotJoined)?;
        let result = session.shutdown().await;
        self.setup.reset();
        result
    }

    async fn establish(&self, code: &RoomCode) -> Result<GuestSession, RoomError> {
        let config = &self.config;
        let name = code.network_name();
        let secret = code.network_secret();

        let mut mesh = self.agent.start(&name, &secret, &MeshOptions::default()).await?;
        let mut logs = mesh.take_logs();

        let host = match locate_host(&mut *mesh, logs.as_mut(), config).await {
            Ok(host) => host,
            Err(e) => {
                stop_mesh(&mut *mesh).await;
                return Err(e);
            }
        };
        let remote = SocketAddr::new(IpAddr::V4(config.host_overlay_ip), host.port);

        let (coordination_addr, coordination_relay) = match config.forwarding {
            ForwardingMode::Relay => {
                let mut relay = StreamRelay::new(RelayConfig::new(
                    loopback(config.local_coordination_port),
                    remote,
                ));
                match relay.start().await {
                    Ok(addr) => (addr, Some(relay)),
                    Err(e) => {
                        stop_mesh(&mut *mesh).await;
                        return Err(e.into());
                    }
                }
            }
            ForwardingMode::MeshForward => {
                let local = match forward_port(config.local_coordination_port).await {
                    Ok(local) => local,
                    Err(e) => {
                        stop_mesh(&mut *mesh).await;
                        return Err(e);
                    }
                };
                stop_mesh(&mut *mesh).await;
                let forward = PortForward { local, remote };
                info!("Restarting mesh agent with forward {forward}");
                let options = MeshOptions::default().with_forward(forward);
                mesh = self.agent.start(&name, &secret, &options).await?;
                logs = mesh.take_logs();
                (local, None)
            }
        };

        let mut pending = Pending {
            mesh: Some(mesh),
            log_drain: logs.map(LogDrain::spawn),
            coordination_relay,
        };

        let identity = player_identity(&config.player_name, &config.vendor, config.machine_id.as_deref());
        let mut client = CoordinationClient::new(coordination_addr, identity, config.client.clone());
        let session = match run_workflow(&mut client, config).await {
            Ok(session) => session,
            Err(e) => {
                pending.abort().await;
                return Err(e);
            }
        };

        let game_target = SocketAddr::new(IpAddr::V4(config.host_overlay_ip), session.game_port);
        let mut game_relay = StreamRelay::new(RelayConfig::new(loopback(config.local_game_port), game_target));
        let game_addr = match game_relay.start().await {
            Ok(addr) => addr,
            Err(e) => {
                client.disconnect().await;
                pending.abort().await;
                return Err(e.into());
            }
        };

        let announcer = if config.announce_lan {
            let announce = AnnounceConfig {
                motd: format!("Scaffold room {code}"),
                port: game_addr.port(),
                ..AnnounceConfig::default()
            };
            match LanAnnouncer::start(announce).await {
                Ok(announcer) => Some(announcer),
                Err(e) => {
                    warn!("LAN announcement unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let Pending {
            mesh,
            log_drain,
            coordination_relay,
        } = pending;
        let mesh = mesh.ok_or_else(|| RoomError::Mesh("mesh agent handle lost".into()))?;

        Ok(GuestSession {
            joined: JoinedRoom {
                code: code.clone(),
                host,
                game_addr,
                session,
            },
            mesh,
            log_drain,
            client,
            coordination_relay,
            game_relay,
            announcer,
        })
    }
}

impl GuestSession {
    async fn shutdown(mut self) -> Result<(), RoomError> {
        if let Some(announcer) = self.announcer.take() {
            announcer.stop().await;
        }
        self.client.disconnect().await;
        self.game_relay.stop().await;
        if let Some(relay) = self.coordination_relay.as_mut() {
            relay.stop().await;
        }
        let result = self.mesh.stop().await;
        drop(self.log_drain.take());
        info!("Left room {}", self.joined.code);
        result
    }
}

/// Resources started before the workflow succeeded.
struct Pending {
    mesh: Option<Box<dyn MeshHandle>>,
    log_drain: Option<LogDrain>,
    coordination_relay: Option<StreamRelay>,
}

impl Pending {
    async fn abort(&mut self) {
        if let Some(relay) = self.coordination_relay.as_mut() {
            relay.stop().await;
        }
        if let Some(mut mesh) = self.mesh.take() {
            stop_mesh(&mut *mesh).await;
        }
        drop(self.log_drain.take());
    }
}

/// Find the host in the agent's log, then in its peer table.
async fn locate_host(
    mesh: &mut dyn MeshHandle,
    logs: Option<&mut LogStream>,
    config: &RoomConfig,
) -> Result<HostEndpoint, RoomError> {
    let from_logs = match logs {
        Some(logs) => discovery::wait_for_host(logs, config.discovery_timeout).await,
        None => Err(RoomError::HostNotFound),
    };

    match from_logs {
        Ok(host) => Ok(host),
        Err(e @ (RoomError::HostNotFound | RoomError::HostDiscoveryTimeout(_))) => {
            debug!("Host not seen in agent log ({e}); checking peer table");
            mesh.peer_table()
                .await?
                .as_deref()
                .and_then(discovery::find_host_in_peer_table)
                .and_then(|hostname| HostEndpoint::from_hostname(&hostname))
                .ok_or(e)
        }
        Err(e) => Err(e),
    }
}

/// Run the standard workflow, retrying transient failures a bounded number
/// of times.
async fn run_workflow(
    client: &mut CoordinationClient,
    config: &RoomConfig,
) -> Result<SessionInfo, RoomError> {
    let attempts = config.workflow_attempts.max(1);
    let mut last_err = NetworkError::Unreachable { attempts: 0 };

    for attempt in 1..=attempts {
        match client.run_standard_workflow().await {
            Ok(session) => return Ok(session),
            Err(e) if !e.is_retryable() => {
                warn!("Workflow against room host failed: {e}");
                return Err(e.into());
            }
            Err(e) => {
                warn!("Workflow attempt {attempt}/{attempts} failed: {e}");
                last_err = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.workflow_retry_delay).await;
        }
    }
    Err(last_err.into())
}

async fn stop_mesh(mesh: &mut dyn MeshHandle) {
    if let Err(e) = mesh.stop().await {
        warn!("Failed to stop mesh agent: {e}");
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Local address for an agent-side forward. Port 0 asks the OS for a free one.
async fn forward_port(port: u16) -> Result<SocketAddr, RoomError> {
    if port != 0 {
        return Ok(loopback(port));
    }
    let listener = TcpListener::bind(loopback(0)).await?;
    Ok(listener.local_addr()?)
}
