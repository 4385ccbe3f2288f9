//! Player registry: presence tracking and host election.
//!
//! One mutex guards the whole map together with the host identity, so every
//! operation (including the expiry sweep) is atomic with respect to the
//! others. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::NetworkError;

/// A guest silent for longer than this is dropped by the next sweep.
pub const GUEST_EXPIRY: Duration = Duration::from_secs(30);

/// Role of a player in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlayerKind {
    Host,
    Guest,
}

/// Body of a `c:player_ping` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub name: String,
    pub machine_id: String,
    pub vendor: String,
}

/// One element of the `c:player_profiles_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    pub machine_id: String,
    pub vendor: String,
    pub kind: PlayerKind,
}

/// A registry entry: the profile plus its last heartbeat.
#[derive(Debug, Clone)]
pub struct PlayerEntry {
    pub profile: PlayerProfile,
    pub last_ping: DateTime<Utc>,
}

impl PlayerEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.profile.kind == PlayerKind::Guest
            && now.signed_duration_since(self.last_ping).to_std().unwrap_or_default() > GUEST_EXPIRY
    }
}

/// Name and machine id of the current host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub name: String,
    pub machine_id: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    players: HashMap<String, PlayerEntry>,
    host: Option<HostInfo>,
}

impl RegistryState {
    fn is_host(&self, machine_id: &str) -> bool {
        self.host.as_ref().is_some_and(|h| h.machine_id == machine_id)
    }

    /// Demote the current host entry unless it is `keep`.
    fn demote_host(&mut self, keep: &str) {
        if let Some(host) = self.host.take() {
            if host.machine_id != keep {
                if let Some(entry) = self.players.get_mut(&host.machine_id) {
                    entry.profile.kind = PlayerKind::Guest;
                    debug!("Demoted {} ({}) to guest", host.name, host.machine_id);
                }
            }
        }
    }

    fn check_single_host(&self) {
        let hosts = self
            .players
            .values()
            .filter(|e| e.profile.kind == PlayerKind::Host)
            .count();
        debug_assert!(hosts <= 1, "registry holds {hosts} host entries");
        if hosts > 1 {
            warn!("Registry holds {hosts} host entries");
        }
    }
}

fn install_host(
    state: &mut RegistryState,
    name: &str,
    machine_id: &str,
    vendor: &str,
    now: DateTime<Utc>,
) {
    state.demote_host(machine_id);
    state.players.insert(
        machine_id.to_string(),
        PlayerEntry {
            profile: PlayerProfile {
                name: name.to_string(),
                machine_id: machine_id.to_string(),
                vendor: vendor.to_string(),
                kind: PlayerKind::Host,
            },
            last_ping: now,
        },
    );
    state.host = Some(HostInfo {
        name: name.to_string(),
        machine_id: machine_id.to_string(),
    });
    state.check_single_host();
}

/// Concurrent presence store keyed by machine id.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    state: Mutex<RegistryState>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat. The entry becomes HOST iff its machine id is the
    /// current host id, GUEST otherwise.
    pub fn record_ping(
        &self,
        identity: PlayerIdentity,
        now: DateTime<Utc>,
    ) -> Result<PlayerKind, NetworkError> {
        if identity.machine_id.trim().is_empty() {
            return Err(NetworkError::InvalidArgument("empty machine_id".into()));
        }

        let mut state = self.state.lock();
        let kind = if state.is_host(&identity.machine_id) {
            PlayerKind::Host
        } else {
            PlayerKind::Guest
        };
        let fresh = !state.players.contains_key(&identity.machine_id);
        state.players.insert(
            identity.machine_id.clone(),
            PlayerEntry {
                profile: PlayerProfile {
                    name: identity.name,
                    machine_id: identity.machine_id,
                    vendor: identity.vendor,
                    kind,
                },
                last_ping: now,
            },
        );
        if fresh {
            info!("Player joined ({} online)", state.players.len());
        }
        Ok(kind)
    }

    /// Drop expired guests, then snapshot the remaining profiles. Both steps
    /// happen under one lock acquisition.
    pub fn sweep_and_snapshot(&self, now: DateTime<Utc>) -> Vec<PlayerProfile> {
        let mut state = self.state.lock();
        state.players.retain(|id, entry| {
            let expired = entry.is_expired(now);
            if expired {
                info!("Expired silent player {} ({id})", entry.profile.name);
            }
            !expired
        });

        let mut profiles: Vec<PlayerProfile> =
            state.players.values().map(|e| e.profile.clone()).collect();
        profiles.sort_by(|a, b| {
            (a.kind != PlayerKind::Host, &a.name, &a.machine_id)
                .cmp(&(b.kind != PlayerKind::Host, &b.name, &b.machine_id))
        });
        profiles
    }

    /// Snapshot without sweeping.
    pub fn players(&self) -> Vec<PlayerProfile> {
        self.state
            .lock()
            .players
            .values()
            .map(|e| e.profile.clone())
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.state.lock().players.len()
    }

    pub fn get(&self, machine_id: &str) -> Option<PlayerEntry> {
        self.state.lock().players.get(machine_id).cloned()
    }

    pub fn host(&self) -> Option<HostInfo> {
        self.state.lock().host.clone()
    }

    pub fn is_host(&self, machine_id: &str) -> bool {
        self.state.lock().is_host(machine_id)
    }

    /// Install `machine_id` as host with a fresh profile, demoting any
    /// previous host.
    pub fn set_host(&self, name: &str, machine_id: &str, vendor: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        install_host(&mut state, name, machine_id, vendor, now);
        info!("Host set to {name} ({machine_id})");
    }

    /// [`set_host`](Self::set_host) unless a host already exists. Returns
    /// whether the host was installed.
    pub fn set_host_if_absent(
        &self,
        name: &str,
        machine_id: &str,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.host.is_some() {
            return false;
        }
        install_host(&mut state, name, machine_id, vendor, now);
        info!("Default host set to {name} ({machine_id})");
        true
    }

    /// Promote an existing player. Returns `false` if `machine_id` is unknown.
    pub fn transfer_host(&self, machine_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(name) = state.players.get(machine_id).map(|e| e.profile.name.clone()) else {
            warn!("Host transfer failed: no player {machine_id}");
            return false;
        };

        state.demote_host(machine_id);
        if let Some(entry) = state.players.get_mut(machine_id) {
            entry.profile.kind = PlayerKind::Host;
        }
        state.host = Some(HostInfo {
            name: name.clone(),
            machine_id: machine_id.to_string(),
        });
        state.check_single_host();
        info!("Host transferred to {name} ({machine_id})");
        true
    }

    /// Promote `machine_id`, creating its entry if it has never pinged.
    /// An existing entry keeps its vendor and heartbeat time.
    pub fn force_set_host(&self, name: &str, machine_id: &str, vendor: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.demote_host(machine_id);
        match state.players.get_mut(machine_id) {
            Some(entry) => {
                entry.profile.kind = PlayerKind::Host;
                entry.profile.name = name.to_string();
            }
            None => {
                state.players.insert(
                    machine_id.to_string(),
                    PlayerEntry {
                        profile: PlayerProfile {
                            name: name.to_string(),
                            machine_id: machine_id.to_string(),
                            vendor: vendor.to_string(),
                            kind: PlayerKind::Host,
                        },
                        last_ping: now,
                    },
                );
            }
        }
        state.host = Some(HostInfo {
            name: name.to_string(),
            machine_id: machine_id.to_string(),
        });
        state.check_single_host();
        info!("Host forced to {name} ({machine_id})");
    }

    /// Demote the host entry to guest and forget the host identity.
    pub fn remove_host_status(&self) {
        let mut state = self.state.lock();
        state.demote_host("");
        info!("Host status removed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn identity(id: &str) -> PlayerIdentity {
        PlayerIdentity {
            name: format!("player-{id}"),
            machine_id: id.to_string(),
            vendor: "test".into(),
        }
    }

    fn host_count(registry: &PlayerRegistry) -> usize {
        registry
            .players()
            .iter()
            .filter(|p| p.kind == PlayerKind::Host)
            .count()
    }

    #[test]
    fn test_kind_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&PlayerKind::Host).unwrap(), "\"HOST\"");
        assert_eq!(serde_json::to_string(&PlayerKind::Guest).unwrap(), "\"GUEST\"");
    }

    #[test]
    fn test_ping_assigns_kind() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        registry.set_host("Alice", "a", "v", now);

        assert_eq!(registry.record_ping(identity("a"), now).unwrap(), PlayerKind::Host);
        assert_eq!(registry.record_ping(identity("b"), now).unwrap(), PlayerKind::Guest);
        assert_eq!(registry.player_count(), 2);
        // The ping overwrote the host's profile name but kept it host.
        assert_eq!(registry.get("a").unwrap().profile.name, "player-a");
    }

    #[test]
    fn test_ping_upserts_by_machine_id() {
        let registry = PlayerRegistry::new();
        let t0 = Utc::now();
        registry.record_ping(identity("b"), t0).unwrap();
        registry
            .record_ping(identity("b"), t0 + TimeDelta::seconds(10))
            .unwrap();
        assert_eq!(registry.player_count(), 1);
        assert_eq!(registry.get("b").unwrap().last_ping, t0 + TimeDelta::seconds(10));
    }

    #[test]
    fn test_ping_rejects_empty_machine_id() {
        let registry = PlayerRegistry::new();
        assert!(matches!(
            registry.record_ping(identity(""), Utc::now()),
            Err(NetworkError::InvalidArgument(_))
        ));
        assert_eq!(registry.player_count(), 0);
    }

    #[test]
    fn test_guest_expiry() {
        let registry = PlayerRegistry::new();
        let t0 = Utc::now();
        registry.set_host("Alice", "a", "v", t0);
        registry.record_ping(identity("b"), t0).unwrap();
        registry.record_ping(identity("c"), t0 + TimeDelta::seconds(20)).unwrap();

        // Exactly 30 s is still alive.
        let list = registry.sweep_and_snapshot(t0 + TimeDelta::seconds(30));
        assert_eq!(list.len(), 3);

        let list = registry.sweep_and_snapshot(t0 + TimeDelta::seconds(31));
        let ids: Vec<&str> = list.iter().map(|p| p.machine_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        // The host survives any age.
        let list = registry.sweep_and_snapshot(t0 + TimeDelta::days(2));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].kind, PlayerKind::Host);
    }

    #[test]
    fn test_snapshot_lists_host_first() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        registry.record_ping(identity("a"), now).unwrap();
        registry.set_host("Zed", "z", "v", now);
        let list = registry.sweep_and_snapshot(now);
        assert_eq!(list[0].machine_id, "z");
    }

    #[test]
    fn test_set_host_demotes_previous() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        registry.set_host("Alice", "a", "v", now);
        registry.set_host("Bob", "b", "v", now);

        assert_eq!(host_count(&registry), 1);
        assert_eq!(registry.get("a").unwrap().profile.kind, PlayerKind::Guest);
        assert!(registry.is_host("b"));
        assert_eq!(registry.host().unwrap().name, "Bob");
    }

    #[test]
    fn test_transfer_host() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        registry.set_host("Alice", "a", "v", now);
        registry.record_ping(identity("b"), now).unwrap();

        assert!(!registry.transfer_host("missing"));
        assert!(registry.is_host("a"));

        assert!(registry.transfer_host("b"));
        assert!(registry.is_host("b"));
        assert_eq!(registry.get("a").unwrap().profile.kind, PlayerKind::Guest);
        assert_eq!(registry.get("b").unwrap().profile.kind, PlayerKind::Host);
        assert_eq!(host_count(&registry), 1);

        // Transferring to the current host is a no-op that keeps it host.
        assert!(registry.transfer_host("b"));
        assert_eq!(host_count(&registry), 1);
    }

    #[test]
    fn test_force_set_host() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        registry.set_host("Alice", "a", "v", now);

        registry.force_set_host("Ghost", "g", "host", now);
        assert!(registry.is_host("g"));
        assert_eq!(registry.get("g").unwrap().profile.vendor, "host");
        assert_eq!(host_count(&registry), 1);

        registry.record_ping(identity("b"), now).unwrap();
        registry.force_set_host("Bobby", "b", "host", now);
        let b = registry.get("b").unwrap();
        assert_eq!(b.profile.name, "Bobby");
        assert_eq!(b.profile.vendor, "test");
        assert_eq!(host_count(&registry), 1);
    }

    #[test]
    fn test_remove_host_status() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        registry.set_host("Alice", "a", "v", now);
        registry.remove_host_status();

        assert!(registry.host().is_none());
        assert_eq!(host_count(&registry), 0);
        assert_eq!(registry.get("a").unwrap().profile.kind, PlayerKind::Guest);
    }

    #[test]
    fn test_set_host_if_absent() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        assert!(registry.set_host_if_absent("Host", "h", "v", now));
        assert!(!registry.set_host_if_absent("Other", "o", "v", now));
        assert!(registry.is_host("h"));
    }

    #[test]
    fn test_single_host_after_mixed_operations() {
        let registry = PlayerRegistry::new();
        let now = Utc::now();
        assert_eq!(host_count(&registry), 0);
        for id in ["a", "b", "c", "d"] {
            registry.record_ping(identity(id), now).unwrap();
        }
        registry.set_host("A", "a", "v", now);
        registry.transfer_host("c");
        registry.force_set_host("X", "x", "host", now);
        registry.set_host("B", "b", "v", now);
        registry.transfer_host("d");
        registry.force_set_host("D", "d", "host", now);
        assert_eq!(host_count(&registry), 1);
        assert!(registry.is_host("d"));
    }

    #[test]
    fn test_concurrent_pings_survive_sweeps() {
        use std::sync::Arc;

        let registry = Arc::new(PlayerRegistry::new());
        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        registry
                            .record_ping(identity(&format!("{t}-{i}")), now)
                            .unwrap();
                        registry.sweep_and_snapshot(now);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.sweep_and_snapshot(now).len(), 400);
    }
}
