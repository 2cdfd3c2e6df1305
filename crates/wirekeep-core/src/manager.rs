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

//! Interface and peer lifecycle orchestration.
//!
//! Every successful mutation persists the whole registry before returning. A
//! persistence failure is reported as [`WireguardError::Persistence`] and the
//! in-memory change is kept.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDateTime;
use ipnetwork::Ipv4Network;
use rand::Rng;
use tracing::{error, info, warn};
use uuid::Uuid;
use wirekeep_types::{
    InterfaceEdit, InterfaceStatus, PeerEdit, TrafficData, TrafficHistory, TrafficSnapshot,
};

use crate::config::{
    self, ConfigFile, ConfigFileRef, LoggerConfig, TrafficConfig, WireguardConfig,
};
use crate::conf;
use crate::error::WireguardError;
use crate::interface::{Interface, is_reserved_address, networks_overlap};
use crate::keys;
use crate::network;
use crate::peer::Peer;
use crate::registry::{Interfaces, NamedMap};
use crate::shell::{Host, Shell};
use crate::traffic::{self, TrafficAccounting};

const NETWORK_ATTEMPTS: usize = 100;
const RESTART_PAUSE: Duration = Duration::from_secs(1);
const DEFAULT_DNS1: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
const DEFAULT_DNS2: Ipv4Addr = Ipv4Addr::new(8, 8, 4, 4);

/// An interface named either by uuid or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceRef {
    ById(Uuid),
    ByName(String),
}

impl From<Uuid> for InterfaceRef {
    fn from(uuid: Uuid) -> Self {
        Self::ById(uuid)
    }
}

impl From<&str> for InterfaceRef {
    fn from(name: &str) -> Self {
        Self::ByName(name.to_string())
    }
}

impl fmt::Display for InterfaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(uuid) => write!(f, "{uuid}"),
            Self::ByName(name) => f.write_str(name),
        }
    }
}

pub struct WireguardManager<S> {
    host: Host<S>,
    interfaces: Interfaces,
    pending_interfaces: HashMap<Uuid, Interface>,
    pending_peers: HashMap<Uuid, Peer>,
    traffic: TrafficAccounting,
    traffic_config: TrafficConfig,
    logger: LoggerConfig,
    config_path: PathBuf,
}

impl<S: Shell> WireguardManager<S> {
    /// Build the manager from a loaded config, using the built-in traffic drivers.
    pub async fn from_config(
        shell: S,
        config: ConfigFile,
        config_path: impl Into<PathBuf>,
    ) -> Result<Self, WireguardError> {
        let traffic = TrafficAccounting::from_config(&config.traffic)?;
        Self::with_traffic(shell, config, config_path, traffic).await
    }

    /// Build the manager around an already selected traffic driver.
    ///
    /// Every loaded interface gets its conf path and peer back-references
    /// rebuilt, and its conf file rewritten.
    pub async fn with_traffic(
        shell: S,
        config: ConfigFile,
        config_path: impl Into<PathBuf>,
        traffic: TrafficAccounting,
    ) -> Result<Self, WireguardError> {
        let ConfigFile {
            logger,
            wireguard,
            traffic: traffic_config,
            mut interfaces,
        } = config;
        let host = Host::new(shell, wireguard);

        for iface in interfaces.values_mut() {
            iface.relink(host.conf_file_for(&iface.name));
            iface.save().await?;
        }
        info!(interface_count = interfaces.len(), "wireguard manager ready");

        Ok(Self {
            host,
            interfaces,
            pending_interfaces: HashMap::new(),
            pending_peers: HashMap::new(),
            traffic,
            traffic_config,
            logger,
            config_path: config_path.into(),
        })
    }

    pub fn wireguard_config(&self) -> &WireguardConfig {
        &self.host.config
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    pub fn pending_interface(&self, uuid: Uuid) -> Option<&Interface> {
        self.pending_interfaces.get(&uuid)
    }

    pub fn pending_peer(&self, uuid: Uuid) -> Option<&Peer> {
        self.pending_peers.get(&uuid)
    }

    pub fn interface(&self, target: &InterfaceRef) -> Result<&Interface, WireguardError> {
        let found = match target {
            InterfaceRef::ById(uuid) => self.interfaces.get(*uuid),
            InterfaceRef::ByName(name) => self.interfaces.find_by_name(name),
        };
        found.ok_or_else(|| WireguardError::not_found(format!("Unknown interface {target}")))
    }

    pub fn peer(&self, uuid: Uuid) -> Result<&Peer, WireguardError> {
        self.interfaces
            .peer(uuid)
            .ok_or_else(|| WireguardError::not_found(format!("Unknown peer {uuid}")))
    }

    fn resolve(&self, target: &InterfaceRef) -> Result<Uuid, WireguardError> {
        self.interface(target).map(|i| i.uuid)
    }

    fn owner_of(&self, peer: Uuid) -> Result<Uuid, WireguardError> {
        self.interfaces
            .peer_owner(peer)
            .map(|i| i.uuid)
            .ok_or_else(|| WireguardError::not_found(format!("Unknown peer {peer}")))
    }

    fn interface_mut(&mut self, uuid: Uuid) -> Result<&mut Interface, WireguardError> {
        self.interfaces
            .get_mut(uuid)
            .ok_or_else(|| WireguardError::not_found(format!("Unknown interface {uuid}")))
    }

    async fn persist(&self) -> Result<(), WireguardError> {
        let view = ConfigFileRef {
            logger: &self.logger,
            wireguard: &self.host.config,
            traffic: &self.traffic_config,
            interfaces: &self.interfaces,
        };
        config::save(&self.config_path, &view).await.map_err(|e| {
            error!(path = %self.config_path.display(), error = %e, "failed to persist registry");
            WireguardError::from(e)
        })
    }

    async fn save_conf(&self, uuid: Uuid) -> Result<(), WireguardError> {
        match self.interfaces.get(uuid) {
            Some(iface) => iface.save().await,
            None => Ok(()),
        }
    }

    async fn bring_up(&self, uuid: Uuid) -> Result<(), WireguardError> {
        let iface = self.interface(&uuid.into())?;
        iface.up(&self.host).await
    }

    /// Down, flushing traffic first so the counter reset loses nothing.
    async fn bring_down(&self, uuid: Uuid) -> Result<(), WireguardError> {
        let iface = self.interface(&uuid.into())?;
        iface
            .down(&self.host, self.traffic.flush(&self.host, &self.interfaces))
            .await
    }

    // -- Interfaces --

    fn free_interface_name(&self) -> String {
        (0..)
            .map(|n| format!("wg{n}"))
            .find(|name| {
                self.interfaces.find_by_name(name).is_none()
                    && !self.pending_interfaces.values().any(|i| &i.name == name)
            })
            .unwrap_or_default()
    }

    fn free_interface_network(&self) -> Result<Ipv4Network, WireguardError> {
        let mut rng = rand::thread_rng();
        for _ in 0..NETWORK_ATTEMPTS {
            let ip = Ipv4Addr::new(10, rng.gen_range(0..=255), rng.gen_range(0..=255), 1);
            let candidate =
                Ipv4Network::new(ip, 24).map_err(|e| WireguardError::invalid(e.to_string()))?;
            let taken = Interface::is_ip_in_use(candidate.ip(), &self.interfaces, None)
                || Interface::is_network_in_use(candidate, &self.interfaces, None)
                || self
                    .pending_interfaces
                    .values()
                    .any(|i| networks_overlap(i.ipv4_address, candidate));
            if !taken {
                return Ok(candidate);
            }
        }
        Err(WireguardError::invalid(format!(
            "Unable to obtain a free network (tried {NETWORK_ATTEMPTS} times)"
        )))
    }

    /// Create an interface with defaults and stage it until [`Self::add_iface`].
    #[tracing::instrument(skip(self))]
    pub async fn generate_interface(&mut self) -> Result<Interface, WireguardError> {
        let name = self.free_interface_name();
        let ipv4_address = self.free_interface_network()?;
        let staged_ports: Vec<u16> =
            self.pending_interfaces.values().map(|i| i.listen_port).collect();
        let listen_port = Interface::get_unused_port(&self.interfaces, &staged_ports)?;
        let gw_iface = network::default_gateway(&self.host.shell).await;
        let (on_up, on_down) =
            Interface::default_rules(&self.host.config.iptables_bin, &name, &gw_iface);
        let keys = self.host.keys().generate_pair().await?;

        let iface = Interface {
            uuid: Uuid::new_v4(),
            conf_file: self.host.conf_file_for(&name),
            name,
            description: String::new(),
            gw_iface,
            ipv4_address,
            listen_port,
            auto: true,
            on_up,
            on_down,
            private_key: keys.private_key,
            public_key: keys.public_key,
            peers: NamedMap::new(),
        };
        info!(interface = %iface.name, uuid = %iface.uuid, "generated pending interface");
        self.pending_interfaces.insert(iface.uuid, iface.clone());
        Ok(iface)
    }

    /// Move a generated interface into the registry.
    #[tracing::instrument(skip(self))]
    pub async fn add_iface(&mut self, uuid: Uuid) -> Result<(), WireguardError> {
        let Some(mut iface) = self.pending_interfaces.remove(&uuid) else {
            return Err(WireguardError::invalid("Invalid interface addition!"));
        };
        let checked = Interface::validate(
            &iface.name,
            iface.ipv4_address,
            iface.listen_port,
            &self.interfaces,
            None,
        );
        if let Err(e) = checked {
            self.pending_interfaces.insert(uuid, iface);
            return Err(e);
        }
        iface.relink(self.host.conf_file_for(&iface.name));
        if let Err(e) = iface.save().await {
            self.pending_interfaces.insert(uuid, iface);
            return Err(e);
        }
        info!(interface = %iface.name, "interface added");
        self.interfaces.insert(iface);
        self.persist().await
    }

    /// Apply new settings. A renamed interface that is up is restarted under
    /// its new name; other changes to a running interface need [`Self::apply_iface`].
    #[tracing::instrument(skip(self))]
    pub async fn edit_interface(
        &mut self,
        target: InterfaceRef,
        edit: InterfaceEdit,
    ) -> Result<(), WireguardError> {
        let uuid = self.resolve(&target)?;
        Interface::validate(
            &edit.name,
            edit.ipv4_address,
            edit.listen_port,
            &self.interfaces,
            Some(uuid),
        )?;

        let iface = self.interface(&uuid.into())?;
        if let Some(peer) = iface.peers.values().find(|p| {
            let moved = Ipv4Network::new(p.ipv4_address.ip(), edit.ipv4_address.prefix())
                .unwrap_or(p.ipv4_address);
            !edit.ipv4_address.contains(p.ipv4_address.ip()) || is_reserved_address(moved)
        }) {
            return Err(WireguardError::invalid(format!(
                "Peer {} would be left outside of network {}/{}",
                peer.name,
                edit.ipv4_address.network(),
                edit.ipv4_address.prefix()
            )));
        }

        let renamed = iface.name != edit.name;
        let restart = renamed && iface.is_up(&self.host).await;
        if restart {
            self.bring_down(uuid).await?;
        }
        if renamed {
            iface.remove_conf_file().await?;
        }

        let (default_up, default_down) =
            Interface::default_rules(&self.host.config.iptables_bin, &edit.name, &edit.gw_iface);
        let conf_file = self.host.conf_file_for(&edit.name);
        let iface = self.interface_mut(uuid)?;
        iface.name = edit.name;
        iface.description = edit.description;
        iface.ipv4_address = edit.ipv4_address;
        iface.listen_port = edit.listen_port;
        iface.gw_iface = edit.gw_iface;
        iface.auto = edit.auto;
        iface.on_up = if edit.on_up.is_empty() { default_up } else { edit.on_up };
        iface.on_down = if edit.on_down.is_empty() { default_down } else { edit.on_down };
        let prefix = iface.ipv4_address.prefix();
        for peer in iface.peers.values_mut() {
            if let Ok(address) = Ipv4Network::new(peer.ipv4_address.ip(), prefix) {
                peer.ipv4_address = address;
            }
        }
        iface.relink(conf_file);
        self.interfaces.sort();

        self.save_conf(uuid).await?;
        if restart {
            self.bring_up(uuid).await?;
        }
        info!(uuid = %uuid, "interface edited");
        self.persist().await
    }

    /// Tear down an interface with all its peers and forget it.
    #[tracing::instrument(skip(self))]
    pub async fn remove_interface(&mut self, target: InterfaceRef) -> Result<(), WireguardError> {
        let uuid = self.resolve(&target)?;
        self.bring_down(uuid).await?;

        let Some(mut iface) = self.interfaces.remove(uuid) else {
            return Err(WireguardError::not_found(format!("Unknown interface {target}")));
        };
        iface.peers.clear();
        iface.remove_conf_file().await?;
        self.interfaces.sort();
        self.pending_peers.retain(|_, p| p.interface != uuid);
        info!(interface = %iface.name, "interface removed");
        self.persist().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn regenerate_keys(&mut self, target: InterfaceRef) -> Result<(), WireguardError> {
        let uuid = self.resolve(&target)?;
        let keys = self.host.keys().generate_pair().await?;
        let iface = self.interface_mut(uuid)?;
        iface.private_key = keys.private_key;
        iface.public_key = keys.public_key;
        self.save_conf(uuid).await?;
        info!(uuid = %uuid, "interface keys regenerated");
        self.persist().await
    }

    pub async fn interface_status(
        &self,
        target: InterfaceRef,
    ) -> Result<InterfaceStatus, WireguardError> {
        let iface = self.interface(&target)?;
        Ok(iface.status(&self.host).await)
    }

    pub async fn is_up(&self, target: InterfaceRef) -> Result<bool, WireguardError> {
        let iface = self.interface(&target)?;
        Ok(iface.is_up(&self.host).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn iface_up(&self, target: InterfaceRef) -> Result<(), WireguardError> {
        self.bring_up(self.resolve(&target)?).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn iface_down(&self, target: InterfaceRef) -> Result<(), WireguardError> {
        self.bring_down(self.resolve(&target)?).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn save_iface(&self, target: InterfaceRef) -> Result<(), WireguardError> {
        self.save_conf(self.resolve(&target)?).await
    }

    /// Down, save, up. A failing up leaves the interface saved but down.
    #[tracing::instrument(skip(self))]
    pub async fn apply_iface(&self, target: InterfaceRef) -> Result<(), WireguardError> {
        let uuid = self.resolve(&target)?;
        self.bring_down(uuid).await?;
        self.save_conf(uuid).await?;
        self.bring_up(uuid).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn restart_iface(&self, target: InterfaceRef) -> Result<(), WireguardError> {
        let uuid = self.resolve(&target)?;
        self.bring_down(uuid).await?;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.bring_up(uuid).await
    }

    /// Bring up every interface marked `auto`.
    pub async fn start(&self) {
        info!("starting VPN server");
        for iface in self.interfaces.values().filter(|i| i.auto) {
            if let Err(e) = iface.up(&self.host).await {
                error!(interface = %iface.name, error = %e, "failed to start interface");
            }
        }
        info!("VPN server started");
    }

    /// Bring every interface down.
    pub async fn stop(&self) {
        info!("stopping VPN server");
        for iface in self.interfaces.values() {
            if let Err(e) = self.bring_down(iface.uuid).await {
                error!(interface = %iface.name, error = %e, "failed to stop interface");
            }
        }
        info!("VPN server stopped");
    }

    /// Move every conf file to `folder`. Running interfaces are restarted on
    /// the relocated file.
    #[tracing::instrument(skip(self))]
    pub async fn relocate_interfaces_folder(
        &mut self,
        folder: PathBuf,
    ) -> Result<(), WireguardError> {
        if folder == self.host.config.interfaces_folder {
            return Ok(());
        }
        tokio::fs::create_dir_all(&folder).await?;

        for uuid in self.interfaces.uuids() {
            let iface = self.interface(&uuid.into())?;
            let was_up = iface.is_up(&self.host).await;
            if was_up {
                self.bring_down(uuid).await?;
            }
            self.interface(&uuid.into())?.remove_conf_file().await?;

            let iface = self.interface_mut(uuid)?;
            let conf_file = folder.join(format!("{}.conf", iface.name));
            iface.relink(conf_file);
            self.save_conf(uuid).await?;
            if was_up {
                self.bring_up(uuid).await?;
            }
        }

        info!(
            from = %self.host.config.interfaces_folder.display(),
            to = %folder.display(),
            "relocated interfaces folder"
        );
        self.host.config.interfaces_folder = folder;
        self.persist().await
    }

    /// Import a server side conf file as a new interface.
    #[tracing::instrument(skip(self, text))]
    pub async fn import_interface(
        &mut self,
        name: &str,
        text: &str,
    ) -> Result<Uuid, WireguardError> {
        let parsed = conf::parse_interface_conf(text)?;
        keys::validate_key(&parsed.private_key)?;
        if self.host.config.check_gateway_on_import
            && !network::device_exists(&self.host.shell, &parsed.gw_iface).await
        {
            return Err(WireguardError::invalid(format!(
                "Invalid configuration file! Gateway device {} does not exist.",
                parsed.gw_iface
            )));
        }
        Interface::validate(name, parsed.ipv4_address, parsed.listen_port, &self.interfaces, None)?;
        let public_key = self.host.keys().generate_public_key(&parsed.private_key).await?;

        let iface = Interface {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            gw_iface: parsed.gw_iface,
            ipv4_address: parsed.ipv4_address,
            listen_port: parsed.listen_port,
            auto: true,
            on_up: parsed.on_up,
            on_down: parsed.on_down,
            private_key: parsed.private_key,
            public_key,
            conf_file: self.host.conf_file_for(name),
            peers: NamedMap::new(),
        };
        iface.save().await?;
        let uuid = iface.uuid;
        info!(interface = %name, uuid = %uuid, "interface imported");
        self.interfaces.insert(iface);
        self.persist().await?;
        Ok(uuid)
    }

    // -- Peers --

    fn free_peer_address(&self, iface: &Interface) -> Result<Ipv4Network, WireguardError> {
        let used = self.interfaces.used_ips();
        let network = iface.ipv4_address;
        let prefix = network.prefix();
        let ip = network
            .iter()
            .filter_map(|ip| Ipv4Network::new(ip, prefix).ok())
            .find(|candidate| {
                !is_reserved_address(*candidate)
                    && !used.contains(&candidate.ip())
                    && !self
                        .pending_peers
                        .values()
                        .any(|p| p.interface == iface.uuid && p.ipv4_address.ip() == candidate.ip())
            });
        ip.ok_or_else(|| {
            WireguardError::invalid(format!(
                "No free addresses left in network {}/{}",
                network.network(),
                prefix
            ))
        })
    }

    fn free_peer_name(&self) -> String {
        (1..)
            .map(|n| format!("peer-{n}"))
            .find(|name| {
                !self.interfaces.all_peers().any(|p| &p.name == name)
                    && !self.pending_peers.values().any(|p| &p.name == name)
            })
            .unwrap_or_default()
    }

    /// Create a peer of `target` with defaults and stage it until [`Self::add_peer`].
    #[tracing::instrument(skip(self))]
    pub async fn generate_peer(&mut self, target: InterfaceRef) -> Result<Peer, WireguardError> {
        let iface = self.interface(&target)?;
        let interface = iface.uuid;
        let ipv4_address = self.free_peer_address(iface)?;
        let name = self.free_peer_name();
        let keys = self.host.keys().generate_pair().await?;

        let peer = Peer {
            uuid: Uuid::new_v4(),
            name,
            description: String::new(),
            ipv4_address,
            nat: false,
            dns1: DEFAULT_DNS1,
            dns2: Some(DEFAULT_DNS2),
            private_key: keys.private_key,
            public_key: keys.public_key,
            interface,
        };
        info!(peer = %peer.name, uuid = %peer.uuid, "generated pending peer");
        self.pending_peers.insert(peer.uuid, peer.clone());
        Ok(peer)
    }

    /// Move a generated peer into its interface.
    #[tracing::instrument(skip(self))]
    pub async fn add_peer(&mut self, uuid: Uuid) -> Result<(), WireguardError> {
        let Some(peer) = self.pending_peers.remove(&uuid) else {
            return Err(WireguardError::invalid("Invalid peer addition!"));
        };
        let checked = self.interface(&peer.interface.into()).and_then(|iface| {
            Peer::validate(&peer.name, peer.ipv4_address, iface, &self.interfaces, None)
        });
        if let Err(e) = checked {
            self.pending_peers.insert(uuid, peer);
            return Err(e);
        }

        let owner = peer.interface;
        info!(peer = %peer.name, "peer added");
        self.interface_mut(owner)?.add_peer(peer);
        self.save_conf(owner).await?;
        self.persist().await
    }

    /// Change a peer, possibly moving it to another interface.
    #[tracing::instrument(skip(self))]
    pub async fn edit_peer(&mut self, uuid: Uuid, edit: PeerEdit) -> Result<(), WireguardError> {
        let owner = self.owner_of(uuid)?;
        let target = self.interface(&edit.interface.into())?;
        let ipv4_address = Peer::address_in(edit.ipv4_address.ip(), target)?;
        Peer::validate(&edit.name, ipv4_address, target, &self.interfaces, Some(uuid))?;

        let Some(mut peer) = self.interface_mut(owner)?.peers.remove(uuid) else {
            return Err(WireguardError::not_found(format!("Unknown peer {uuid}")));
        };
        peer.name = edit.name;
        peer.description = edit.description;
        peer.ipv4_address = ipv4_address;
        peer.dns1 = edit.dns1;
        peer.dns2 = edit.dns2;
        peer.nat = edit.nat;
        self.interface_mut(edit.interface)?.add_peer(peer);

        self.save_conf(owner).await?;
        if owner != edit.interface {
            self.save_conf(edit.interface).await?;
        }
        info!(uuid = %uuid, "peer edited");
        self.persist().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_peer(&mut self, uuid: Uuid) -> Result<(), WireguardError> {
        let owner = self.owner_of(uuid)?;
        if let Some(peer) = self.interface_mut(owner)?.peers.remove(uuid) {
            info!(peer = %peer.name, "peer removed");
        }
        self.save_conf(owner).await?;
        self.persist().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn regenerate_peer_keys(&mut self, uuid: Uuid) -> Result<(), WireguardError> {
        let owner = self.owner_of(uuid)?;
        let keys = self.host.keys().generate_pair().await?;
        if let Some(peer) = self.interface_mut(owner)?.peers.get_mut(uuid) {
            peer.private_key = keys.private_key;
            peer.public_key = keys.public_key;
        }
        self.save_conf(owner).await?;
        self.persist().await
    }

    /// Client conf for download.
    pub fn peer_conf(&self, uuid: Uuid) -> Result<String, WireguardError> {
        let owner = self.interface(&self.owner_of(uuid)?.into())?;
        let peer = self.peer(uuid)?;
        Ok(peer.generate_conf(owner, &self.host.config.endpoint))
    }

    /// Import a client side conf file as a new peer of `target`.
    #[tracing::instrument(skip(self, text))]
    pub async fn import_peer(
        &mut self,
        name: &str,
        text: &str,
        target: InterfaceRef,
    ) -> Result<Uuid, WireguardError> {
        let parsed = conf::parse_peer_conf(text)?;
        keys::validate_key(&parsed.private_key)?;
        let iface = self.interface(&target)?;
        let owner = iface.uuid;
        let ipv4_address = Peer::address_in(parsed.ipv4_address.ip(), iface)?;
        Peer::validate(name, ipv4_address, iface, &self.interfaces, None)?;
        let public_key = self.host.keys().generate_public_key(&parsed.private_key).await?;

        let peer = Peer {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            ipv4_address,
            nat: parsed.nat,
            dns1: parsed.dns1,
            dns2: parsed.dns2,
            private_key: parsed.private_key,
            public_key,
            interface: owner,
        };
        let uuid = peer.uuid;
        info!(peer = %name, uuid = %uuid, "peer imported");
        self.interface_mut(owner)?.add_peer(peer);
        self.save_conf(owner).await?;
        self.persist().await?;
        Ok(uuid)
    }

    // -- Traffic --

    pub async fn session_data(&self) -> Result<TrafficSnapshot, WireguardError> {
        traffic::session_data(&self.host, &self.interfaces).await
    }

    pub async fn session_and_stored_data(&self) -> Result<TrafficHistory, WireguardError> {
        self.traffic
            .session_and_stored_data(&self.host, &self.interfaces)
            .await
    }

    /// Periodic save. Only warns when accounting is disabled.
    pub async fn save_traffic(&self) -> Result<(), WireguardError> {
        if !self.traffic.enabled() {
            warn!("traffic data collection is disabled");
            return Ok(());
        }
        self.traffic.save_data(&self.host, &self.interfaces).await
    }

    pub async fn device_history(
        &self,
        uuid: Uuid,
    ) -> Result<Vec<(NaiveDateTime, TrafficData)>, WireguardError> {
        Ok(self.traffic.device_history(uuid, &self.interfaces).await?)
    }

    /// Cumulative total of one device, live session included.
    pub async fn total_traffic(&self, uuid: Uuid) -> Result<Option<TrafficData>, WireguardError> {
        let history = self.session_and_stored_data().await?;
        Ok(traffic::total_traffic(uuid, &history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_refs_convert_and_display() {
        let uuid = Uuid::new_v4();
        assert_eq!(InterfaceRef::from(uuid), InterfaceRef::ById(uuid));
        assert_eq!(InterfaceRef::from("wg0"), InterfaceRef::ByName("wg0".into()));
        assert_eq!(InterfaceRef::from("wg0").to_string(), "wg0");
        assert_eq!(InterfaceRef::from(uuid).to_string(), uuid.to_string());
    }
}
