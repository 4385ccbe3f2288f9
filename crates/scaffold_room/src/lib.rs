//! Scaffold Room: hosting and joining rooms over an overlay mesh.
//!
//! A host opens a [`HostRoom`]: it generates a room code, runs the
//! coordination server and brings up the mesh agent under the server's
//! hostname. A guest hands the code to [`GuestRoom::join`], which finds the
//! host through the agent, runs the client workflow and exposes the game
//! port locally.
//!
//! The mesh agent itself is external; implement [`MeshAgent`] to plug one in.

pub mod config;
pub mod discovery;
pub mod error;
pub mod guest;
pub mod host;
pub mod mesh;
pub mod setup;

pub use config::{ForwardingMode, RoomConfig};
pub use discovery::HostEndpoint;
pub use error::RoomError;
pub use guest::{GuestRoom, JoinedRoom};
pub use host::HostRoom;
pub use mesh::{LogDrain, LogStream, MeshAgent, MeshHandle, MeshOptions, PortForward};
pub use setup::{SetupGuard, SetupState};
