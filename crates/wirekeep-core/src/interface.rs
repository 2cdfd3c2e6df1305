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

use std::fmt::Write;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::LazyLock;

use ipnetwork::Ipv4Network;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wirekeep_types::InterfaceStatus;

use crate::error::WireguardError;
use crate::peer::Peer;
use crate::registry::{Interfaces, Named, NamedMap};
use crate::shell::{Host, Shell};

pub const MIN_PORT: u16 = 50000;
pub const MAX_PORT: u16 = 65535;
pub const PORT_ATTEMPTS: usize = 100;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 15;

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z_\-0-9]{1,14}$").unwrap());

fn default_true() -> bool {
    true
}

/// A WireGuard interface definition and the peers it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Host device the interface masquerades through.
    pub gw_iface: String,
    pub ipv4_address: Ipv4Network,
    pub listen_port: u16,
    #[serde(default = "default_true")]
    pub auto: bool,
    #[serde(default)]
    pub on_up: Vec<String>,
    #[serde(default)]
    pub on_down: Vec<String>,
    pub private_key: String,
    pub public_key: String,
    /// Where `wg-quick` reads this interface from. Rebuilt from the
    /// interfaces folder, never persisted.
    #[serde(skip)]
    pub conf_file: PathBuf,
    #[serde(default)]
    pub peers: NamedMap<Peer>,
}

impl Named for Interface {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Interface {
    /// Forwarding and masquerading rules installed on up and removed on down.
    pub fn default_rules(
        iptables: &str,
        name: &str,
        gw_iface: &str,
    ) -> (Vec<String>, Vec<String>) {
        let rules = |op: &str| {
            vec![
                format!("{iptables} {op} FORWARD -i {name} -j ACCEPT"),
                format!("{iptables} {op} FORWARD -o {name} -j ACCEPT"),
                format!("{iptables} -t nat {op} POSTROUTING -o {gw_iface} -j MASQUERADE"),
            ]
        };
        (rules("-I"), rules("-D"))
    }

    /// Point the interface at its conf file and its peers back at it.
    pub fn relink(&mut self, conf_file: PathBuf) {
        self.conf_file = conf_file;
        let uuid = self.uuid;
        for peer in self.peers.values_mut() {
            peer.interface = uuid;
        }
    }

    pub fn add_peer(&mut self, mut peer: Peer) {
        peer.interface = self.uuid;
        self.peers.insert(peer);
    }

    /// Server side `wg-quick` configuration.
    pub fn generate_conf(&self) -> String {
        let mut conf = String::new();
        writeln!(conf, "[Interface]").unwrap();
        writeln!(conf, "PrivateKey = {}", self.private_key).unwrap();
        writeln!(conf, "Address = {}", self.ipv4_address).unwrap();
        writeln!(conf, "ListenPort = {}", self.listen_port).unwrap();
        for cmd in &self.on_up {
            writeln!(conf, "PostUp = {cmd}").unwrap();
        }
        for cmd in &self.on_down {
            writeln!(conf, "PostDown = {cmd}").unwrap();
        }

        for peer in self.peers.values() {
            writeln!(conf).unwrap();
            writeln!(conf, "[Peer]").unwrap();
            writeln!(conf, "PublicKey = {}", peer.public_key).unwrap();
            writeln!(conf, "AllowedIPs = {}", peer.ipv4_address).unwrap();
        }
        conf
    }

    pub async fn save(&self) -> Result<(), WireguardError> {
        debug!(
            interface = %self.name,
            path = %self.conf_file.display(),
            "saving interface configuration"
        );
        if let Some(parent) = self.conf_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.conf_file, self.generate_conf()).await?;
        Ok(())
    }

    pub async fn remove_conf_file(&self) -> Result<(), WireguardError> {
        match tokio::fs::remove_file(&self.conf_file).await {
            Ok(()) => {
                debug!(
                    interface = %self.name,
                    path = %self.conf_file.display(),
                    "removed conf file"
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn is_up<S: Shell>(&self, host: &Host<S>) -> bool {
        match host.run(&format!("ip a | grep -w {}", self.name)).await {
            Ok(result) => result.successful(),
            Err(e) => {
                warn!(interface = %self.name, error = %e, "unable to query interface state");
                false
            }
        }
    }

    pub async fn status<S: Shell>(&self, host: &Host<S>) -> InterfaceStatus {
        let command = format!("{} show {}", host.config.wg_bin, self.name);
        match host.run_as_root(&command).await {
            Ok(result) if result.successful() => InterfaceStatus::Up,
            _ => InterfaceStatus::Down,
        }
    }

    pub async fn up<S: Shell>(&self, host: &Host<S>) -> Result<(), WireguardError> {
        info!(interface = %self.name, "starting interface");
        if self.is_up(host).await {
            warn!(interface = %self.name, "unable to bring interface up: already up");
            return Ok(());
        }
        self.save().await?;

        let command = format!("{} up {}", host.config.wg_quick_bin, self.conf_file.display());
        let result = host.run_as_root(&command).await?;
        if !result.successful() {
            error!(
                interface = %self.name,
                code = result.code,
                stderr = %result.err,
                stdout = %result.output,
                "failed to start interface"
            );
            return Err(WireguardError::command(result.err));
        }
        info!(interface = %self.name, "interface started");
        Ok(())
    }

    /// Bring the interface down. `before_teardown` only runs when the
    /// interface is actually up, right before `wg-quick down`.
    pub async fn down<S, F>(&self, host: &Host<S>, before_teardown: F) -> Result<(), WireguardError>
    where
        S: Shell,
        F: Future<Output = Result<(), WireguardError>>,
    {
        info!(interface = %self.name, "stopping interface");
        if !self.is_up(host).await {
            warn!(interface = %self.name, "unable to bring interface down: already down");
            return Ok(());
        }
        if let Err(e) = before_teardown.await {
            warn!(interface = %self.name, error = %e, "pre-teardown hook failed");
        }

        let command = format!("{} down {}", host.config.wg_quick_bin, self.conf_file.display());
        let result = host.run_as_root(&command).await?;
        if !result.successful() {
            error!(
                interface = %self.name,
                code = result.code,
                stderr = %result.err,
                stdout = %result.output,
                "failed to stop interface"
            );
            return Err(WireguardError::command(result.err));
        }
        info!(interface = %self.name, "interface stopped");
        Ok(())
    }

    pub fn is_name_valid(name: &str) -> bool {
        NAME_REGEX.is_match(name)
    }

    pub fn is_name_in_use(name: &str, interfaces: &Interfaces, exclude: Option<Uuid>) -> bool {
        interfaces
            .values()
            .any(|i| i.name == name && Some(i.uuid) != exclude)
    }

    /// Whether an interface other than `exclude`, or any peer, already uses `ip`.
    pub fn is_ip_in_use(ip: Ipv4Addr, interfaces: &Interfaces, exclude: Option<Uuid>) -> bool {
        interfaces
            .values()
            .filter(|i| Some(i.uuid) != exclude)
            .any(|i| i.ipv4_address.ip() == ip)
            || interfaces.all_peers().any(|p| p.ipv4_address.ip() == ip)
    }

    /// Whether `address`'s network overlaps the network of another interface.
    pub fn is_network_in_use(
        address: Ipv4Network,
        interfaces: &Interfaces,
        exclude: Option<Uuid>,
    ) -> bool {
        interfaces
            .values()
            .filter(|i| Some(i.uuid) != exclude)
            .any(|i| networks_overlap(i.ipv4_address, address))
    }

    pub fn is_port_in_use(port: u16, interfaces: &Interfaces, exclude: Option<Uuid>) -> bool {
        interfaces
            .values()
            .any(|i| i.listen_port == port && Some(i.uuid) != exclude)
    }

    /// Random free port. `reserved` holds ports claimed outside the registry,
    /// such as those of staged interfaces.
    pub fn get_unused_port(
        interfaces: &Interfaces,
        reserved: &[u16],
    ) -> Result<u16, WireguardError> {
        let mut rng = rand::thread_rng();
        unused_port_from(
            || rng.gen_range(MIN_PORT..=MAX_PORT),
            |port| reserved.contains(&port) || Self::is_port_in_use(port, interfaces, None),
        )
    }

    /// Run every field validator, failing on the first violation.
    pub fn validate(
        name: &str,
        address: Ipv4Network,
        port: u16,
        interfaces: &Interfaces,
        exclude: Option<Uuid>,
    ) -> Result<(), WireguardError> {
        if !Self::is_name_valid(name) {
            return Err(WireguardError::invalid(format!(
                "Interface name can only contain lowercase alphanumeric characters, underscores (_) \
                 and hyphens (-). It must also begin with a letter and be between {MIN_NAME_LENGTH} \
                 and {MAX_NAME_LENGTH} characters long."
            )));
        }
        if Self::is_name_in_use(name, interfaces, exclude) {
            return Err(WireguardError::invalid(format!("Interface name {name} already in use!")));
        }
        if Self::is_ip_in_use(address.ip(), interfaces, exclude) {
            return Err(WireguardError::invalid(format!(
                "Address {} already in use!",
                address.ip()
            )));
        }
        if Self::is_network_in_use(address, interfaces, exclude) {
            return Err(WireguardError::invalid(format!(
                "Network {}/{} already has a wireguard interface!",
                address.network(),
                address.prefix()
            )));
        }
        if is_reserved_address(address) {
            return Err(WireguardError::invalid("Unable to use a reserved address"));
        }
        if port < MIN_PORT {
            return Err(WireguardError::invalid(format!(
                "Listen port must be between {MIN_PORT} and {MAX_PORT}"
            )));
        }
        if Self::is_port_in_use(port, interfaces, exclude) {
            return Err(WireguardError::invalid(format!("Port {port} already in use!")));
        }
        Ok(())
    }
}

/// Draw ports until one is free, giving up after [`PORT_ATTEMPTS`] draws.
pub fn unused_port_from(
    mut draw: impl FnMut() -> u16,
    in_use: impl Fn(u16) -> bool,
) -> Result<u16, WireguardError> {
    for _ in 0..PORT_ATTEMPTS {
        let port = draw();
        if !in_use(port) {
            return Ok(port);
        }
    }
    Err(WireguardError::invalid(format!(
        "Unable to obtain a free port (tried {PORT_ATTEMPTS} times)"
    )))
}

pub fn networks_overlap(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Network and broadcast addresses cannot be assigned to a device.
pub fn is_reserved_address(address: Ipv4Network) -> bool {
    address.prefix() < 31
        && (address.ip() == address.network() || address.ip() == address.broadcast())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use test_case::test_case;

    fn iface(name: &str, address: &str, port: u16) -> Interface {
        Interface {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            gw_iface: "eth0".to_string(),
            ipv4_address: address.parse().unwrap(),
            listen_port: port,
            auto: true,
            on_up: Vec::new(),
            on_down: Vec::new(),
            private_key: "cHJpdmF0ZQ==".to_string(),
            public_key: "cHVibGlj".to_string(),
            conf_file: PathBuf::new(),
            peers: NamedMap::new(),
        }
    }

    fn peer(name: &str, address: &str) -> Peer {
        Peer {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            ipv4_address: address.parse().unwrap(),
            nat: false,
            dns1: Ipv4Addr::new(8, 8, 8, 8),
            dns2: None,
            private_key: "cGVlci1wcml2".to_string(),
            public_key: format!("{name}-pub"),
            interface: Uuid::nil(),
        }
    }

    fn registry() -> Interfaces {
        let mut wg0 = iface("wg0", "10.0.0.1/24", 51820);
        wg0.add_peer(peer("laptop", "10.0.0.2/24"));
        let mut interfaces = Interfaces::new();
        interfaces.insert(wg0);
        interfaces.insert(iface("wg1", "10.1.0.1/24", 51821));
        interfaces
    }

    #[test_case("wg0", true ; "short")]
    #[test_case("vpn_home-01", true ; "punctuation")]
    #[test_case("w", false ; "too short")]
    #[test_case("averyveryverylongname", false ; "too long")]
    #[test_case("0wg", false ; "leading digit")]
    #[test_case("Wg0", false ; "uppercase")]
    #[test_case("wg 0", false ; "whitespace")]
    fn name_validation(name: &str, expected: bool) {
        assert_eq!(Interface::is_name_valid(name), expected);
    }

    #[test]
    fn conf_lists_rules_then_peers() {
        let mut wg0 = iface("wg0", "10.0.0.1/24", 50000);
        let (on_up, on_down) = Interface::default_rules("/usr/sbin/iptables", "wg0", "eth0");
        wg0.on_up = on_up;
        wg0.on_down = on_down;
        wg0.add_peer(peer("phone", "10.0.0.3/24"));
        wg0.add_peer(peer("laptop", "10.0.0.2/24"));

        let expected = "\
[Interface]
PrivateKey = cHJpdmF0ZQ==
Address = 10.0.0.1/24
ListenPort = 50000
PostUp = /usr/sbin/iptables -I FORWARD -i wg0 -j ACCEPT
PostUp = /usr/sbin/iptables -I FORWARD -o wg0 -j ACCEPT
PostUp = /usr/sbin/iptables -t nat -I POSTROUTING -o eth0 -j MASQUERADE
PostDown = /usr/sbin/iptables -D FORWARD -i wg0 -j ACCEPT
PostDown = /usr/sbin/iptables -D FORWARD -o wg0 -j ACCEPT
PostDown = /usr/sbin/iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE

[Peer]
PublicKey = laptop-pub
AllowedIPs = 10.0.0.2/24

[Peer]
PublicKey = phone-pub
AllowedIPs = 10.0.0.3/24
";
        assert_eq!(wg0.generate_conf(), expected);
    }

    #[test]
    fn relink_points_peers_at_owner() {
        let mut interfaces = registry();
        let uuid = interfaces.find_by_name("wg0").unwrap().uuid;
        let wg0 = interfaces.get_mut(uuid).unwrap();
        wg0.relink(PathBuf::from("/tmp/wg0.conf"));
        assert!(wg0.peers.values().all(|p| p.interface == uuid));
        assert_eq!(wg0.conf_file, PathBuf::from("/tmp/wg0.conf"));
    }

    #[test]
    fn ip_usage_covers_interfaces_and_peers() {
        let interfaces = registry();
        let wg0 = interfaces.find_by_name("wg0").unwrap().uuid;
        assert!(Interface::is_ip_in_use("10.0.0.1".parse().unwrap(), &interfaces, None));
        assert!(!Interface::is_ip_in_use("10.0.0.1".parse().unwrap(), &interfaces, Some(wg0)));
        assert!(Interface::is_ip_in_use("10.0.0.2".parse().unwrap(), &interfaces, Some(wg0)));
        assert!(!Interface::is_ip_in_use("10.0.0.9".parse().unwrap(), &interfaces, None));
    }

    #[test_case("10.0.0.50/24", true ; "same network")]
    #[test_case("10.0.0.1/16", true ; "supernet")]
    #[test_case("10.0.0.130/25", true ; "subnet")]
    #[test_case("10.2.0.1/24", false ; "disjoint")]
    fn network_overlap(address: &str, expected: bool) {
        let interfaces = registry();
        assert_eq!(
            Interface::is_network_in_use(address.parse().unwrap(), &interfaces, None),
            expected
        );
    }

    #[test_case("10.0.0.0/24", true ; "network address")]
    #[test_case("10.0.0.255/24", true ; "broadcast address")]
    #[test_case("10.0.0.1/24", false ; "host address")]
    #[test_case("10.0.0.0/32", false ; "single host")]
    fn reserved_addresses(address: &str, expected: bool) {
        assert_eq!(is_reserved_address(address.parse().unwrap()), expected);
    }

    #[test]
    fn port_usage_respects_exclusion() {
        let interfaces = registry();
        let wg1 = interfaces.find_by_name("wg1").unwrap().uuid;
        assert!(Interface::is_port_in_use(51821, &interfaces, None));
        assert!(!Interface::is_port_in_use(51821, &interfaces, Some(wg1)));
    }

    #[test]
    fn unused_port_gives_up_after_limit() {
        let draws = Cell::new(0);
        let err = unused_port_from(
            || {
                draws.set(draws.get() + 1);
                MIN_PORT
            },
            |_| true,
        )
        .unwrap_err();
        assert_eq!(draws.get(), PORT_ATTEMPTS);
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "Unable to obtain a free port (tried 100 times)");
    }

    #[test]
    fn unused_port_skips_taken_ones() {
        let mut ports = [51820, 51821, 50001].into_iter();
        let interfaces = registry();
        let port = unused_port_from(
            || ports.next().unwrap(),
            |p| Interface::is_port_in_use(p, &interfaces, None),
        )
        .unwrap();
        assert_eq!(port, 50001);
    }

    #[test]
    fn random_port_is_in_range() {
        let port = Interface::get_unused_port(&registry(), &[]).unwrap();
        assert!(port >= MIN_PORT);
    }

    #[test]
    fn reserved_ports_count_as_used() {
        let reserved: Vec<u16> = (MIN_PORT..=MAX_PORT).collect();
        let err = Interface::get_unused_port(&Interfaces::new(), &reserved).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test_case(22, false ; "well known port")]
    #[test_case(49999, false ; "just below range")]
    #[test_case(50000, true ; "lowest")]
    #[test_case(65535, true ; "highest")]
    fn listen_port_range(port: u16, accepted: bool) {
        let address = "10.5.0.1/24".parse().unwrap();
        let result = Interface::validate("wg2", address, port, &Interfaces::new(), None);
        match result {
            Ok(()) => assert!(accepted),
            Err(e) => {
                assert!(!accepted);
                assert_eq!(e.to_string(), "Listen port must be between 50000 and 65535");
                assert_eq!(e.status_code(), 400);
            }
        }
    }

    #[test]
    fn validate_reports_first_problem() {
        let interfaces = registry();
        let address = "10.5.0.1/24".parse().unwrap();
        assert!(Interface::validate("wg2", address, 51822, &interfaces, None).is_ok());

        let err = Interface::validate("wg1", address, 51822, &interfaces, None).unwrap_err();
        assert_eq!(err.to_string(), "Interface name wg1 already in use!");

        let err = Interface::validate("wg2", address, 51820, &interfaces, None).unwrap_err();
        assert_eq!(err.to_string(), "Port 51820 already in use!");

        let err =
            Interface::validate("wg2", "10.5.0.0/24".parse().unwrap(), 51822, &interfaces, None)
                .unwrap_err();
        assert_eq!(err.to_string(), "Unable to use a reserved address");
    }

    #[tokio::test]
    async fn save_writes_conf_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut wg0 = iface("wg0", "10.0.0.1/24", 50000);
        wg0.relink(dir.path().join("interfaces").join("wg0.conf"));

        wg0.save().await.unwrap();
        let written = tokio::fs::read_to_string(&wg0.conf_file).await.unwrap();
        assert_eq!(written, wg0.generate_conf());

        wg0.remove_conf_file().await.unwrap();
        assert!(!wg0.conf_file.exists());
        wg0.remove_conf_file().await.unwrap();
    }
}
