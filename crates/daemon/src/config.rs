//! Daemon configuration

use crate::document::HookDefaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path (registry database lives here)
    pub store_path: PathBuf,

    /// HTTP listen address
    pub listen: String,

    /// Upper bound for each document read or write
    pub io_timeout_secs: u64,

    /// WireGuard interface configuration
    pub wireguard: WireGuardConfig,

    /// Key provisioning configuration
    pub keys: KeysConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: wgsync_common::default_store_path(),
            listen: "127.0.0.1:8000".to_string(),
            io_timeout_secs: 5,
            wireguard: WireGuardConfig::default(),
            keys: KeysConfig::default(),
        }
    }
}

/// Interface document settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardConfig {
    /// Path of the document read by wg-quick
    pub document_path: PathBuf,

    pub listen_port: u16,

    /// Interface's own address, written when the document is first created
    pub interface_address: String,

    /// Egress interface used by the default NAT rule
    pub egress_interface: String,

    /// Public `host:port` placed in rendered client configs
    pub endpoint: Option<String>,

    /// DNS server placed in rendered client configs
    pub dns: Option<String>,
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            document_path: PathBuf::from("/etc/wireguard/wg0.conf"),
            listen_port: 51830,
            interface_address: "10.10.10.1/24".to_string(),
            egress_interface: "ens3".to_string(),
            endpoint: None,
            dns: None,
        }
    }
}

impl WireGuardConfig {
    pub fn hook_defaults(&self) -> HookDefaults {
        HookDefaults::new(self.egress_interface.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyProviderKind {
    Builtin,
    WgTool,
}

/// Key provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub provider: KeyProviderKind,

    /// `wg` binary used by the wg-tool provider
    pub wg_binary: String,

    pub timeout_secs: u64,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            provider: KeyProviderKind::Builtin,
            wg_binary: "wg".to_string(),
            timeout_secs: 5,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the registry database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("registry.db")
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn key_timeout(&self) -> Duration {
        Duration::from_secs(self.keys.timeout_secs)
    }
}
