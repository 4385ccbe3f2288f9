use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::logging::DEFAULT_FILTER;

/// Default game service port advertised by a host.
pub const DEFAULT_GAME_PORT: u16 = 25565;

/// Overlay address the host pins itself to inside the mesh.
pub const DEFAULT_HOST_OVERLAY_IP: Ipv4Addr = Ipv4Addr::new(10, 144, 144, 1);

/// Application settings stored at `~/.scaffold/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaffoldConfig {
    // Player identity
    pub player_name: String,
    pub vendor: String,
    /// Fixed device id. `None` derives one from the hostname and user.
    pub machine_id: Option<String>,

    // Mesh
    pub host_overlay_ip: Ipv4Addr,

    // Ports
    pub game_port: u16,
    /// Fixed coordination port for hosting. `None` picks one at random.
    pub coordination_port: Option<u16>,

    // Presence
    pub heartbeat_interval_secs: u64,

    // General
    /// `tracing` filter directives used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            player_name: "Player".into(),
            vendor: default_vendor(),
            machine_id: None,
            host_overlay_ip: DEFAULT_HOST_OVERLAY_IP,
            game_port: DEFAULT_GAME_PORT,
            coordination_port: None,
            heartbeat_interval_secs: 5,
            log_level: DEFAULT_FILTER.into(),
        }
    }
}

/// Vendor string sent with every presence heartbeat.
pub fn default_vendor() -> String {
    format!("Scaffold {}", env!("CARGO_PKG_VERSION"))
}

impl ScaffoldConfig {
    /// Returns the base config directory: `~/.scaffold/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".scaffold"))
    }

    /// Returns the config file path: `~/.scaffold/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.scaffold/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Loads config from `~/.scaffold/config.json`, or defaults if missing.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Ok(Self::load_from_path(&path))
    }

    /// Load config from a specific file path.
    ///
    /// A missing file yields defaults. An unreadable or corrupt file is
    /// logged and also yields defaults.
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Corrupt config file {}, using defaults: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Cannot read config file {}, using defaults: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Saves config to `~/.scaffold/config.json`.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to_path(&path)
    }

    /// Save config to a specific file path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ScaffoldConfig::default();
        assert_eq!(config.game_port, 25565);
        assert_eq!(config.host_overlay_ip, Ipv4Addr::new(10, 144, 144, 1));
        assert!(config.machine_id.is_none());
        assert!(config.coordination_port.is_none());
        assert!(config.vendor.starts_with("Scaffold "));
        assert_eq!(config.log_level, DEFAULT_FILTER);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut original = ScaffoldConfig::default();
        original.player_name = "Steve".into();
        original.coordination_port = Some(13448);
        original.log_level = "warn,scaffold_room=trace".into();
        original.save_to_path(&path).unwrap();

        let loaded = ScaffoldConfig::load_from_path(&path);
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = ScaffoldConfig::load_from_path(&tmp.path().join("absent.json"));
        assert_eq!(loaded, ScaffoldConfig::default());
    }

    #[test]
    fn test_corrupt_file_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(ScaffoldConfig::load_from_path(&path), ScaffoldConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"player_name":"Alex"}"#).unwrap();

        let loaded = ScaffoldConfig::load_from_path(&path);
        assert_eq!(loaded.player_name, "Alex");
        assert_eq!(loaded.game_port, DEFAULT_GAME_PORT);
    }
}
