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
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use ipnetwork::Ipv4Network;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WireguardError;
use crate::interface::{Interface, is_reserved_address};
use crate::registry::{Interfaces, Named};

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 64;
pub const KEEPALIVE_SECONDS: u16 = 25;

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][\w\-. ]{1,63}$").unwrap());

/// A remote client allowed to connect through one interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub ipv4_address: Ipv4Network,
    /// Behind NAT: the client conf asks for keepalives.
    #[serde(default)]
    pub nat: bool,
    pub dns1: Ipv4Addr,
    #[serde(default)]
    pub dns2: Option<Ipv4Addr>,
    pub private_key: String,
    pub public_key: String,
    /// Owning interface. Peers are stored nested under it, so this is
    /// rebuilt on load instead of persisted.
    #[serde(skip)]
    pub interface: Uuid,
}

impl Named for Peer {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Peer {
    /// Client side configuration, connecting to `iface` at `endpoint`.
    pub fn generate_conf(&self, iface: &Interface, endpoint: &str) -> String {
        let mut conf = String::new();
        writeln!(conf, "[Interface]").unwrap();
        writeln!(conf, "PrivateKey = {}", self.private_key).unwrap();
        writeln!(conf, "Address = {}", self.ipv4_address).unwrap();
        match self.dns2 {
            Some(dns2) => writeln!(conf, "DNS = {}, {dns2}", self.dns1).unwrap(),
            None => writeln!(conf, "DNS = {}", self.dns1).unwrap(),
        }

        writeln!(conf).unwrap();
        writeln!(conf, "[Peer]").unwrap();
        writeln!(conf, "PublicKey = {}", iface.public_key).unwrap();
        writeln!(conf, "AllowedIPs = 0.0.0.0/0").unwrap();
        writeln!(conf, "Endpoint = {endpoint}:{}", iface.listen_port).unwrap();
        if self.nat {
            writeln!(conf, "PersistentKeepalive = {KEEPALIVE_SECONDS}").unwrap();
        }
        conf
    }

    pub fn is_name_valid(name: &str) -> bool {
        NAME_REGEX.is_match(name)
    }

    /// Whether any interface, or a peer other than `exclude`, already uses `ip`.
    pub fn is_ip_in_use(ip: Ipv4Addr, interfaces: &Interfaces, exclude: Option<Uuid>) -> bool {
        interfaces.values().any(|i| i.ipv4_address.ip() == ip)
            || interfaces
                .all_peers()
                .filter(|p| Some(p.uuid) != exclude)
                .any(|p| p.ipv4_address.ip() == ip)
    }

    /// `ip` with the prefix of `iface`'s network.
    pub fn address_in(ip: Ipv4Addr, iface: &Interface) -> Result<Ipv4Network, WireguardError> {
        Ipv4Network::new(ip, iface.ipv4_address.prefix())
            .map_err(|e| WireguardError::invalid(format!("Invalid address {ip}: {e}")))
    }

    pub fn validate(
        name: &str,
        address: Ipv4Network,
        iface: &Interface,
        interfaces: &Interfaces,
        exclude: Option<Uuid>,
    ) -> Result<(), WireguardError> {
        if !Self::is_name_valid(name) {
            return Err(WireguardError::invalid(format!(
                "Peer name can only contain alphanumeric characters, underscores (_), hyphens (-), \
                 dots (.) and whitespaces. It must also begin with a letter and be between \
                 {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH} characters long."
            )));
        }
        if Self::is_ip_in_use(address.ip(), interfaces, exclude) {
            return Err(WireguardError::invalid(format!(
                "Address {} already in use!",
                address.ip()
            )));
        }
        let network = iface.ipv4_address;
        if !network.contains(address.ip()) {
            return Err(WireguardError::invalid(format!(
                "Address must belong to network {}/{}",
                network.network(),
                network.prefix()
            )));
        }
        let rebased = Ipv4Network::new(address.ip(), network.prefix()).unwrap_or(address);
        if is_reserved_address(rebased) {
            return Err(WireguardError::invalid("Unable to use a reserved address"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::registry::NamedMap;
    use test_case::test_case;

    fn server() -> Interface {
        Interface {
            uuid: Uuid::new_v4(),
            name: "wg0".to_string(),
            description: String::new(),
            gw_iface: "eth0".to_string(),
            ipv4_address: "10.0.0.1/24".parse().unwrap(),
            listen_port: 51820,
            auto: true,
            on_up: Vec::new(),
            on_down: Vec::new(),
            private_key: "c2VydmVyLXByaXY=".to_string(),
            public_key: "c2VydmVyLXB1Yg==".to_string(),
            conf_file: PathBuf::new(),
            peers: NamedMap::new(),
        }
    }

    fn client(nat: bool, dns2: Option<Ipv4Addr>) -> Peer {
        Peer {
            uuid: Uuid::new_v4(),
            name: "laptop".to_string(),
            description: "work laptop".to_string(),
            ipv4_address: "10.0.0.2/24".parse().unwrap(),
            nat,
            dns1: Ipv4Addr::new(8, 8, 8, 8),
            dns2,
            private_key: "Y2xpZW50LXByaXY=".to_string(),
            public_key: "Y2xpZW50LXB1Yg==".to_string(),
            interface: Uuid::nil(),
        }
    }

    #[test]
    fn client_conf_with_nat_and_two_dns() {
        let conf = client(true, Some(Ipv4Addr::new(8, 8, 4, 4)))
            .generate_conf(&server(), "vpn.example.com");
        let expected = "\
[Interface]
PrivateKey = Y2xpZW50LXByaXY=
Address = 10.0.0.2/24
DNS = 8.8.8.8, 8.8.4.4

[Peer]
PublicKey = c2VydmVyLXB1Yg==
AllowedIPs = 0.0.0.0/0
Endpoint = vpn.example.com:51820
PersistentKeepalive = 25
";
        assert_eq!(conf, expected);
    }

    #[test]
    fn client_conf_without_nat() {
        let conf = client(false, None).generate_conf(&server(), "203.0.113.7");
        assert!(conf.contains("DNS = 8.8.8.8\n"));
        assert!(conf.ends_with("Endpoint = 203.0.113.7:51820\n"));
        assert!(!conf.contains("PersistentKeepalive"));
    }

    #[test_case("laptop", true ; "simple")]
    #[test_case("Joe's phone", false ; "apostrophe")]
    #[test_case("Joe phone.v2-b_c", true ; "allowed punctuation")]
    #[test_case("1phone", false ; "leading digit")]
    #[test_case("p", false ; "too short")]
    fn name_validation(name: &str, expected: bool) {
        assert_eq!(Peer::is_name_valid(name), expected);
    }

    #[test]
    fn validate_checks_network_membership() {
        let mut wg0 = server();
        wg0.add_peer(client(false, None));
        let mut interfaces = Interfaces::new();
        interfaces.insert(wg0.clone());

        let ok = "10.0.0.3/24".parse().unwrap();
        assert!(Peer::validate("phone", ok, &wg0, &interfaces, None).is_ok());

        let taken = "10.0.0.2/24".parse().unwrap();
        let err = Peer::validate("phone", taken, &wg0, &interfaces, None).unwrap_err();
        assert_eq!(err.to_string(), "Address 10.0.0.2 already in use!");

        let server_ip = "10.0.0.1/24".parse().unwrap();
        assert!(Peer::validate("phone", server_ip, &wg0, &interfaces, None).is_err());

        let outside = "10.9.0.2/24".parse().unwrap();
        let err = Peer::validate("phone", outside, &wg0, &interfaces, None).unwrap_err();
        assert_eq!(err.to_string(), "Address must belong to network 10.0.0.0/24");

        let broadcast = "10.0.0.255/24".parse().unwrap();
        let err = Peer::validate("phone", broadcast, &wg0, &interfaces, None).unwrap_err();
        assert_eq!(err.to_string(), "Unable to use a reserved address");
    }

    #[test]
    fn address_takes_interface_prefix() {
        let address = Peer::address_in(Ipv4Addr::new(10, 0, 0, 2), &server()).unwrap();
        assert_eq!(address.to_string(), "10.0.0.2/24");
    }
}
