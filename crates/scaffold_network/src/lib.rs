//! Scaffold Network: the SCF coordination protocol and TCP plumbing.
//!
//! A hosted room runs one [`CoordinationServer`]; guests talk to it with a
//! [`CoordinationClient`] to learn the game port and who is online. A
//! [`StreamRelay`] exposes either endpoint on a local port.
//!
//! # Architecture
//!
//! - **Wire**: length-prefixed request/response frames ([`wire`]).
//! - **Routing**: handler-based dispatch keyed by protocol id ([`router`]).
//! - **Registry**: presence and host election behind one lock ([`registry`]).
//! - **Relay**: per-connection byte pumps ([`relay`]).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use scaffold_network::{ClientConfig, CoordinationClient, CoordinationServer};
//! use scaffold_network::identity::player_identity;
//!
//! # async fn example() -> Result<(), scaffold_network::NetworkError> {
//! let mut server = CoordinationServer::with_port(0)?;
//! let addr = server.start().await?;
//! server.set_game_server(25565, true);
//!
//! let me = player_identity("Steve", "example", None);
//! let mut client = CoordinationClient::new(addr, me, ClientConfig::default());
//! let session = client.run_standard_workflow().await?;
//! assert_eq!(session.game_port, 25565);
//!
//! client.disconnect().await;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod announce;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod wire;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use announce::LanAnnouncer;
pub use client::{ClientCanceller, CoordinationClient, SessionInfo};
pub use config::{AnnounceConfig, ClientConfig, RelayConfig, ServerConfig};
pub use error::NetworkError;
pub use protocol::ProtocolSet;
pub use registry::{PlayerIdentity, PlayerKind, PlayerProfile, PlayerRegistry};
pub use relay::StreamRelay;
pub use server::CoordinationServer;
pub use wire::{ScfRequest, ScfResponse};
