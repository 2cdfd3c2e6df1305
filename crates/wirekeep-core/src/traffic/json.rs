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

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wirekeep_types::{TrafficData, TrafficHistory, TrafficSnapshot};

use super::{TrafficError, TrafficStorageDriver};
use crate::config::JsonDriverConfig;
use crate::registry::Interfaces;

type StoredFile = HashMap<String, HashMap<Uuid, TrafficData>>;

/// Stores peer snapshots in a single JSON object keyed by formatted timestamp.
/// Interface totals are derived from their peers on load.
#[derive(Debug, Clone)]
pub struct JsonTrafficDriver {
    pub filepath: PathBuf,
    pub timestamp_format: String,
}

impl JsonTrafficDriver {
    pub fn from_config(config: &JsonDriverConfig) -> Self {
        Self {
            filepath: config.filepath.clone(),
            timestamp_format: config.timestamp_format.clone(),
        }
    }

    fn decode(
        &self,
        raw: StoredFile,
        interfaces: &Interfaces,
    ) -> Result<TrafficHistory, TrafficError> {
        let mut history = TrafficHistory::new();
        for (timestamp, peers) in raw {
            let at = NaiveDateTime::parse_from_str(&timestamp, &self.timestamp_format).map_err(
                |source| TrafficError::Timestamp {
                    value: timestamp.clone(),
                    source,
                },
            )?;
            history.insert(at, with_interface_totals(peers, interfaces));
        }
        Ok(history)
    }

    fn encode(
        &self,
        history: &TrafficHistory,
        interfaces: &Interfaces,
    ) -> BTreeMap<String, BTreeMap<Uuid, TrafficData>> {
        history
            .iter()
            .map(|(at, snapshot)| {
                let peers = snapshot
                    .iter()
                    .filter(|(uuid, _)| !interfaces.contains(**uuid))
                    .map(|(uuid, t)| (*uuid, TrafficData::new(t.rx, t.tx)))
                    .collect();
                (at.format(&self.timestamp_format).to_string(), peers)
            })
            .collect()
    }
}

/// Add an entry per interface summing the stored counters of its peers.
/// Interface counters use WireGuard's direction, so peer rx feeds interface tx.
fn with_interface_totals(
    peers: HashMap<Uuid, TrafficData>,
    interfaces: &Interfaces,
) -> TrafficSnapshot {
    let mut snapshot: TrafficSnapshot = peers;
    for iface in interfaces.values() {
        let mut total = None::<TrafficData>;
        for peer in iface.peers.values() {
            if let Some(t) = snapshot.get(&peer.uuid) {
                *total.get_or_insert_with(TrafficData::default) += TrafficData::new(t.tx, t.rx);
            }
        }
        if let Some(total) = total {
            snapshot.insert(iface.uuid, total);
        }
    }
    snapshot
}

impl TrafficStorageDriver for JsonTrafficDriver {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load_data<'a>(
        &'a self,
        interfaces: &'a Interfaces,
    ) -> BoxFuture<'a, Result<TrafficHistory, TrafficError>> {
        async move {
            let contents = match tokio::fs::read_to_string(&self.filepath).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.filepath.display(), "no stored traffic data yet");
                    return Ok(TrafficHistory::new());
                }
                Err(e) => return Err(e.into()),
            };
            if contents.trim().is_empty() {
                warn!(path = %self.filepath.display(), "traffic data file is empty");
                return Ok(TrafficHistory::new());
            }
            let raw: StoredFile = serde_json::from_str(&contents)?;
            self.decode(raw, interfaces)
        }
        .boxed()
    }

    fn save_data<'a>(
        &'a self,
        history: &'a TrafficHistory,
        interfaces: &'a Interfaces,
    ) -> BoxFuture<'a, Result<(), TrafficError>> {
        async move {
            let contents = serde_json::to_string_pretty(&self.encode(history, interfaces))?;
            if let Some(parent) = self.filepath.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&self.filepath, contents).await?;
            info!(
                path = %self.filepath.display(),
                snapshots = history.len(),
                "stored traffic data"
            );
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use chrono::NaiveDate;

    use super::*;
    use crate::config::DEFAULT_TIMESTAMP_FORMAT;
    use crate::interface::Interface;
    use crate::peer::Peer;
    use crate::registry::NamedMap;

    fn driver(dir: &tempfile::TempDir) -> JsonTrafficDriver {
        JsonTrafficDriver {
            filepath: dir.path().join("data").join("traffic.json"),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }

    fn registry() -> (Interfaces, Uuid, Uuid) {
        let peer = Peer {
            uuid: Uuid::new_v4(),
            name: "laptop".into(),
            description: String::new(),
            ipv4_address: "10.0.0.2/24".parse().unwrap(),
            nat: false,
            dns1: Ipv4Addr::new(8, 8, 8, 8),
            dns2: None,
            private_key: "priv".into(),
            public_key: "pub".into(),
            interface: Uuid::nil(),
        };
        let peer_uuid = peer.uuid;
        let mut wg0 = Interface {
            uuid: Uuid::new_v4(),
            name: "wg0".into(),
            description: String::new(),
            gw_iface: "eth0".into(),
            ipv4_address: "10.0.0.1/24".parse().unwrap(),
            listen_port: 51820,
            auto: true,
            on_up: Vec::new(),
            on_down: Vec::new(),
            private_key: "priv".into(),
            public_key: "pub".into(),
            conf_file: PathBuf::new(),
            peers: NamedMap::new(),
        };
        wg0.add_peer(peer);
        let iface_uuid = wg0.uuid;
        let mut interfaces = Interfaces::new();
        interfaces.insert(wg0);
        (interfaces, iface_uuid, peer_uuid)
    }

    #[tokio::test]
    async fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let (interfaces, _, _) = registry();
        assert!(driver(&dir).load_data(&interfaces).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interface_entries_are_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let (interfaces, iface, peer) = registry();
        let orphan = Uuid::new_v4();
        let at = NaiveDate::from_ymd_opt(2021, 9, 15)
            .unwrap()
            .and_hms_opt(15, 24, 34)
            .unwrap();
        let mut history = TrafficHistory::new();
        history.insert(
            at,
            TrafficSnapshot::from([
                (iface, TrafficData::new(999, 999)),
                (peer, TrafficData::new(10, 20)),
                (orphan, TrafficData::new(1, 1)),
            ]),
        );

        let driver = driver(&dir);
        driver.save_data(&history, &interfaces).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&driver.filepath).unwrap()).unwrap();
        let stored = &raw["15/09/2021 15:24:34"];
        assert!(stored.get(iface.to_string()).is_none());
        assert_eq!(stored[peer.to_string()]["rx"], 10);

        let loaded = driver.load_data(&interfaces).await.unwrap();
        assert_eq!(loaded[&at][&peer], TrafficData::new(10, 20));
        assert_eq!(loaded[&at][&iface], TrafficData::new(20, 10));
        assert_eq!(loaded[&at][&orphan], TrafficData::new(1, 1));
    }

    #[tokio::test]
    async fn bad_timestamp_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(&dir);
        tokio::fs::create_dir_all(driver.filepath.parent().unwrap()).await.unwrap();
        tokio::fs::write(&driver.filepath, r#"{"yesterday": {}}"#).await.unwrap();
        let (interfaces, _, _) = registry();
        let err = driver.load_data(&interfaces).await.unwrap_err();
        assert!(matches!(err, TrafficError::Timestamp { .. }));
    }
}
