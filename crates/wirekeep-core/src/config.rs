// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network;
use crate::registry::Interfaces;
use crate::shell::Shell;

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Everything persisted in the configuration file, registry included.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub wireguard: WireguardConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub interfaces: Interfaces,
}

/// Borrowed view of [`ConfigFile`] used when persisting live state.
#[derive(Debug, Serialize)]
pub struct ConfigFileRef<'a> {
    pub logger: &'a LoggerConfig,
    pub wireguard: &'a WireguardConfig,
    pub traffic: &'a TrafficConfig,
    pub interfaces: &'a Interfaces,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardConfig {
    /// Public host or IP peers connect to.
    pub endpoint: String,
    pub wg_bin: String,
    pub wg_quick_bin: String,
    pub iptables_bin: String,
    pub interfaces_folder: PathBuf,
    pub check_gateway_on_import: bool,
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            wg_bin: "wg".to_string(),
            wg_quick_bin: "wg-quick".to_string(),
            iptables_bin: "iptables".to_string(),
            interfaces_folder: PathBuf::from("/etc/wirekeep/interfaces"),
            check_gateway_on_import: true,
        }
    }
}

impl WireguardConfig {
    /// Fill in empty binary paths and a missing endpoint from the host.
    pub async fn resolve_missing<S: Shell>(&mut self, shell: &S) {
        for (bin, name) in [
            (&mut self.wg_bin, "wg"),
            (&mut self.wg_quick_bin, "wg-quick"),
            (&mut self.iptables_bin, "iptables"),
        ] {
            if !bin.is_empty() {
                continue;
            }
            match network::which(shell, name).await {
                Some(path) => {
                    debug!(binary = name, path = %path, "resolved binary");
                    *bin = path;
                }
                None => {
                    warn!(binary = name, "binary not found, relying on PATH");
                    *bin = name.to_string();
                }
            }
        }

        if self.endpoint.is_empty() {
            warn!("no endpoint specified, using the default gateway's address");
            let gateway = network::default_gateway(shell).await;
            match network::device_ipv4(shell, &gateway).await {
                Some(ip) => {
                    info!(endpoint = %ip, "resolved endpoint");
                    self.endpoint = ip.to_string();
                }
                None => warn!(gateway = %gateway, "unable to resolve an endpoint"),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub enabled: bool,
    /// Name of the storage driver, looked up in the driver registry.
    pub driver: String,
    pub json: JsonDriverConfig,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            driver: "json".to_string(),
            json: JsonDriverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonDriverConfig {
    pub filepath: PathBuf,
    pub timestamp_format: String,
}

impl Default for JsonDriverConfig {
    fn default() -> Self {
        Self {
            filepath: PathBuf::from("traffic.json"),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub async fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
    debug!(path = %path.display(), "loading config");

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let config: ConfigFile = toml::from_str(&contents)?;
            info!(
                path = %path.display(),
                interface_count = config.interfaces.len(),
                "loaded config"
            );
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "config file not found, starting with defaults");
            Ok(ConfigFile::default())
        }
        Err(e) => Err(ConfigError::Read(e)),
    }
}

pub async fn save<T: Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;
    tokio::fs::write(path, contents).await?;
    info!(path = %path.display(), "saved config");
    Ok(())
}
