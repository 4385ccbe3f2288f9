//! Scaffold Core: room identity and shared application plumbing.
//!
//! This crate holds the pieces every other scaffold crate leans on:
//!
//! - **Room codes**: the checksummed `U/XXXX-XXXX-XXXX-XXXX` invitation
//!   format that carries an overlay network's name and secret.
//! - **Legacy codes**: the older base-36 `id z key z port` invitation format.
//! - **Configuration**: persisted JSON settings under `~/.scaffold`.
//! - **Logging**: `tracing` subscriber setup with a rolling file appender.
//!
//! # Quick start
//!
//! ```rust
//! use rand::SeedableRng;
//! use scaffold_core::RoomCode;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let code = RoomCode::generate_fast(&mut rng).unwrap();
//! assert!(RoomCode::validate(code.full_code()));
//! assert!(code.network_name().starts_with("scaffolding-mc-"));
//! ```

pub mod config;
pub mod error;
pub mod legacy_code;
pub mod logging;
pub mod room_code;

pub use config::ScaffoldConfig;
pub use error::CodeError;
pub use room_code::RoomCode;
