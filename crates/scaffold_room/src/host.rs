//! Hosting a room: coordination server plus a mesh agent under the server's
//! hostname.

use std::net::SocketAddr;

use rand::Rng;
use scaffold_core::RoomCode;
use scaffold_network::identity::player_identity;
use scaffold_network::{CoordinationServer, NetworkError, ServerConfig};
use tracing::{info, warn};

use crate::config::{COORDINATION_PORT_RANGE, RoomConfig};
use crate::error::RoomError;
use crate::mesh::{LogDrain, MeshAgent, MeshHandle, MeshOptions};

/// Random ports tried before giving up when none is configured.
const RANDOM_PORT_ATTEMPTS: usize = 5;

pub struct HostRoom {
    code: RoomCode,
    server: CoordinationServer,
    mesh: Box<dyn MeshHandle>,
    log_drain: Option<LogDrain>,
}

impl HostRoom {
    /// Generate a room code, start the coordination server, install the
    /// host player and bring up the mesh agent.
    pub async fn open<R: Rng + ?Sized>(
        config: &RoomConfig,
        agent: &dyn MeshAgent,
        rng: &mut R,
    ) -> Result<Self, RoomError> {
        let code = RoomCode::generate_fast(rng)?;
        let mut server = start_server(config, rng).await?;

        server.set_game_server(config.game_port, true);
        let me = player_identity(&config.player_name, &config.vendor, config.machine_id.as_deref());
        if let Err(e) = server.set_host(&me.name, Some(me.machine_id.as_str()), &me.vendor, rng) {
            server.stop().await;
            return Err(e.into());
        }

        let options = MeshOptions::host(server.hostname(), config.host_overlay_ip);
        let mut mesh = match agent
            .start(&code.network_name(), &code.network_secret(), &options)
            .await
        {
            Ok(mesh) => mesh,
            Err(e) => {
                warn!("Mesh agent failed to start for room {code}: {e}");
                server.stop().await;
                return Err(e);
            }
        };

        let log_drain = mesh.take_logs().map(LogDrain::spawn);

        info!(
            "Hosting room {code} as {} (game port {})",
            server.hostname(),
            config.game_port
        );
        Ok(Self {
            code,
            server,
            mesh,
            log_drain,
        })
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Overlay hostname guests look for.
    pub fn hostname(&self) -> String {
        self.server.hostname()
    }

    /// Bound coordination port.
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn server(&self) -> &CoordinationServer {
        &self.server
    }

    pub fn is_mesh_alive(&mut self) -> bool {
        self.mesh.is_alive()
    }

    /// Stop the mesh agent and the coordination server.
    pub async fn close(mut self) -> Result<(), RoomError> {
        let mesh_result = self.mesh.stop().await;
        drop(self.log_drain.take());
        self.server.stop().await;
        info!("Closed room {}", self.code);
        mesh_result
    }
}

async fn start_server<R: Rng + ?Sized>(
    config: &RoomConfig,
    rng: &mut R,
) -> Result<CoordinationServer, RoomError> {
    if let Some(port) = config.coordination_port {
        return Ok(bind_server(config, port).await?);
    }

    let mut last_err = None;
    for _ in 0..RANDOM_PORT_ATTEMPTS {
        let port = rng.random_range(COORDINATION_PORT_RANGE);
        match bind_server(config, port).await {
            Ok(server) => return Ok(server),
            Err(NetworkError::Io(e)) => {
                warn!("Coordination port {port} unavailable: {e}");
                last_err = Some(NetworkError::Io(e));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err
        .unwrap_or_else(|| NetworkError::InvalidArgument("no coordination port available".into()))
        .into())
}

async fn bind_server(config: &RoomConfig, port: u16) -> Result<CoordinationServer, NetworkError> {
    let mut server = CoordinationServer::new(ServerConfig {
        listen_addr: SocketAddr::new(config.coordination_bind, port),
        ..ServerConfig::default()
    })?;
    server.start().await?;
    Ok(server)
}
