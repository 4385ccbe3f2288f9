//! Stable per-device player identity.

use scaffold_core::ScaffoldConfig;
use sha2::{Digest, Sha256};

use crate::registry::PlayerIdentity;

/// Machine id for this device: SHA-256 of `"<hostname>_<username>"` as
/// lower-case hex. Stable across runs on the same account.
pub fn local_machine_id() -> String {
    let host = whoami::fallible::hostname().unwrap_or_else(|_| whoami::devicename());
    machine_id_for(&host, &whoami::username())
}

/// Machine id for an explicit hostname/user pair.
pub fn machine_id_for(hostname: &str, username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{hostname}_{username}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the `c:player_ping` identity, falling back to [`local_machine_id`]
/// when no fixed id is configured.
pub fn player_identity(name: &str, vendor: &str, machine_id: Option<&str>) -> PlayerIdentity {
    PlayerIdentity {
        name: name.to_string(),
        machine_id: machine_id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(local_machine_id, str::to_string),
        vendor: vendor.to_string(),
    }
}

/// The identity described by the application settings.
pub fn identity_from_config(config: &ScaffoldConfig) -> PlayerIdentity {
    player_identity(&config.player_name, &config.vendor, config.machine_id.as_deref())
}
