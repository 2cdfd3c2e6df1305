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

//! Traffic accounting across interface restarts.
//!
//! WireGuard reports counters from the server's point of view and resets them
//! whenever an interface comes up. Peer entries here are inverted (what the
//! peer received is what the interface transmitted) while interface entries
//! keep WireGuard's direction. Stored snapshots let totals survive restarts.

mod json;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wirekeep_types::{TrafficData, TrafficHistory, TrafficSnapshot};

pub use json::JsonTrafficDriver;

use crate::config::TrafficConfig;
use crate::error::WireguardError;
use crate::registry::Interfaces;
use crate::shell::{Host, Shell};

#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("failed to access traffic data: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed traffic data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("unknown traffic storage driver: {0}")]
    UnknownDriver(String),
}

/// Persistence backend for traffic snapshots.
pub trait TrafficStorageDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every stored snapshot, interface totals included.
    fn load_data<'a>(
        &'a self,
        interfaces: &'a Interfaces,
    ) -> BoxFuture<'a, Result<TrafficHistory, TrafficError>>;

    /// Replace the stored snapshots with `history`.
    fn save_data<'a>(
        &'a self,
        history: &'a TrafficHistory,
        interfaces: &'a Interfaces,
    ) -> BoxFuture<'a, Result<(), TrafficError>>;
}

/// Storage drivers by name.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, Arc<dyn TrafficStorageDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in drivers configured from `config`.
    pub fn with_defaults(config: &TrafficConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonTrafficDriver::from_config(&config.json)));
        registry
    }

    /// Add a driver unless one with the same name already exists.
    pub fn register(&mut self, driver: Arc<dyn TrafficStorageDriver>) -> bool {
        let name = driver.name();
        if self.drivers.contains_key(name) {
            debug!(driver = name, "traffic driver already registered");
            return false;
        }
        self.drivers.insert(name, driver);
        true
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn TrafficStorageDriver>> {
        self.drivers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TrafficStorageDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.drivers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// One peer line of `wg show all dump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPeer {
    pub public_key: String,
    pub latest_handshake: Option<DateTime<Utc>>,
    /// Bytes the interface received from the peer.
    pub transfer_rx: u64,
    /// Bytes the interface sent to the peer.
    pub transfer_tx: u64,
}

/// Parse `wg show all dump` into peers grouped by interface name.
///
/// Interface lines carry 5 tab separated fields, peer lines 9. Anything else
/// is skipped.
pub fn parse_wg_dump(output: &str) -> BTreeMap<String, Vec<DumpPeer>> {
    let mut devices: BTreeMap<String, Vec<DumpPeer>> = BTreeMap::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.len() {
            5 => {
                devices.entry(fields[0].to_string()).or_default();
            }
            9 => {
                let (Ok(handshake), Ok(rx), Ok(tx)) = (
                    fields[5].parse::<i64>(),
                    fields[6].parse::<u64>(),
                    fields[7].parse::<u64>(),
                ) else {
                    warn!(line = %line, "skipping malformed peer line");
                    continue;
                };
                devices
                    .entry(fields[0].to_string())
                    .or_default()
                    .push(DumpPeer {
                        public_key: fields[1].to_string(),
                        latest_handshake: (handshake > 0)
                            .then(|| DateTime::from_timestamp(handshake, 0))
                            .flatten(),
                        transfer_rx: rx,
                        transfer_tx: tx,
                    });
            }
            _ => {
                if !line.trim().is_empty() {
                    debug!(line = %line, "skipping unrecognised dump line");
                }
            }
        }
    }
    devices
}

/// Attribute runtime counters to registry uuids. Devices unknown to the
/// registry are skipped.
pub fn attribute_session(
    dump: &BTreeMap<String, Vec<DumpPeer>>,
    interfaces: &Interfaces,
) -> TrafficSnapshot {
    let mut snapshot = TrafficSnapshot::new();
    for iface in interfaces.values() {
        let Some(runtime_peers) = dump.get(&iface.name) else {
            continue;
        };
        let mut iface_total = TrafficData::default();
        for runtime in runtime_peers {
            let matched = iface.peers.values().find(|p| p.public_key == runtime.public_key);
            let Some(peer) = matched else {
                continue;
            };
            iface_total += TrafficData::new(runtime.transfer_rx, runtime.transfer_tx);
            snapshot.insert(
                peer.uuid,
                TrafficData {
                    rx: runtime.transfer_tx,
                    tx: runtime.transfer_rx,
                    last_handshake: runtime.latest_handshake,
                },
            );
        }
        snapshot.insert(iface.uuid, iface_total);
    }
    snapshot
}

/// Live counters since each running interface last came up.
pub async fn session_data<S: Shell>(
    host: &Host<S>,
    interfaces: &Interfaces,
) -> Result<TrafficSnapshot, WireguardError> {
    let command = format!("{} show all dump", host.config.wg_bin);
    let result = host.run_as_root(&command).await?;
    if !result.successful() {
        return Err(WireguardError::command(result.err));
    }
    Ok(attribute_session(&parse_wg_dump(&result.output), interfaces))
}

/// Stored history plus a snapshot at `now` holding cumulative totals.
///
/// Each session counter is added to the newest stored snapshot that knows the
/// device. Nothing is added when the session is empty.
pub fn merge_session(
    stored: &TrafficHistory,
    session: &TrafficSnapshot,
    now: NaiveDateTime,
) -> TrafficHistory {
    let mut merged = stored.clone();
    if session.is_empty() {
        return merged;
    }
    let totals = session
        .iter()
        .map(|(uuid, traffic)| {
            let mut total = *traffic;
            if let Some(previous) = stored.values().rev().find_map(|s| s.get(uuid)) {
                total += *previous;
            }
            (*uuid, total)
        })
        .collect();
    merged.insert(now, totals);
    merged
}

/// Last known cumulative total of one device.
pub fn total_traffic(uuid: Uuid, history: &TrafficHistory) -> Option<TrafficData> {
    history.values().rev().find_map(|s| s.get(&uuid)).copied()
}

/// Accounting front end used by the manager.
pub struct TrafficAccounting {
    enabled: bool,
    driver: Arc<dyn TrafficStorageDriver>,
}

impl TrafficAccounting {
    pub fn new(enabled: bool, driver: Arc<dyn TrafficStorageDriver>) -> Self {
        Self { enabled, driver }
    }

    pub fn from_config(config: &TrafficConfig) -> Result<Self, TrafficError> {
        Self::with_registry(config, &DriverRegistry::with_defaults(config))
    }

    pub fn with_registry(
        config: &TrafficConfig,
        registry: &DriverRegistry,
    ) -> Result<Self, TrafficError> {
        let driver = registry
            .get(&config.driver)
            .ok_or_else(|| TrafficError::UnknownDriver(config.driver.clone()))?;
        info!(driver = driver.name(), enabled = config.enabled, "traffic accounting ready");
        Ok(Self::new(config.enabled, driver))
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub async fn session_and_stored_data<S: Shell>(
        &self,
        host: &Host<S>,
        interfaces: &Interfaces,
    ) -> Result<TrafficHistory, WireguardError> {
        let stored = self.driver.load_data(interfaces).await?;
        let session = session_data(host, interfaces).await?;
        Ok(merge_session(&stored, &session, Local::now().naive_local()))
    }

    /// Merge the session into the stored data and persist the result.
    pub async fn save_data<S: Shell>(
        &self,
        host: &Host<S>,
        interfaces: &Interfaces,
    ) -> Result<(), WireguardError> {
        let history = self.session_and_stored_data(host, interfaces).await?;
        self.driver.save_data(&history, interfaces).await?;
        debug!(snapshots = history.len(), "traffic data saved");
        Ok(())
    }

    /// [`Self::save_data`] when accounting is enabled, nothing otherwise.
    pub async fn flush<S: Shell>(
        &self,
        host: &Host<S>,
        interfaces: &Interfaces,
    ) -> Result<(), WireguardError> {
        if !self.enabled {
            return Ok(());
        }
        self.save_data(host, interfaces).await
    }

    /// Stored series of one device, oldest first.
    pub async fn device_history(
        &self,
        uuid: Uuid,
        interfaces: &Interfaces,
    ) -> Result<Vec<(NaiveDateTime, TrafficData)>, TrafficError> {
        let stored = self.driver.load_data(interfaces).await?;
        Ok(stored
            .into_iter()
            .filter_map(|(at, mut snapshot)| snapshot.remove(&uuid).map(|t| (at, t)))
            .collect())
    }
}
