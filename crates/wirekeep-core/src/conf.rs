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

//! Parsing of existing `wg-quick` configuration files for import.
//!
//! Parsing only extracts values. Validation against the live registry is the
//! manager's job.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use ipnetwork::Ipv4Network;
use regex::Regex;
use tracing::debug;

use crate::error::WireguardError;

static GATEWAY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"POSTROUTING\s+-o\s+(\S+)").unwrap());

/// Values read from a server side conf file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedInterface {
    pub private_key: String,
    pub ipv4_address: Ipv4Network,
    pub listen_port: u16,
    pub on_up: Vec<String>,
    pub on_down: Vec<String>,
    /// Device named by the `POSTROUTING -o` rule.
    pub gw_iface: String,
}

/// Values read from a client side conf file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedPeer {
    pub private_key: String,
    pub ipv4_address: Ipv4Network,
    pub dns1: Ipv4Addr,
    pub dns2: Option<Ipv4Addr>,
    pub nat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Interface,
    Peer,
}

/// `(section, key, value)` for every assignment line in the file.
fn entries(text: &str) -> Result<Vec<(Section, String, String)>, WireguardError> {
    let mut section = Section::Preamble;
    let mut seen_interface = false;
    let mut entries = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let header = &line[1..line.len() - 1];
            section = if header.trim().eq_ignore_ascii_case("interface") {
                if seen_interface {
                    return Err(WireguardError::invalid(
                        "Invalid configuration file! Only one [Interface] section is allowed.",
                    ));
                }
                seen_interface = true;
                Section::Interface
            } else if header.trim().eq_ignore_ascii_case("peer") {
                Section::Peer
            } else {
                debug!(header = %header, "skipping unknown section");
                Section::Preamble
            };
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            debug!(line = %line, "skipping line without assignment");
            continue;
        };
        entries.push((section, key.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    Ok(entries)
}

fn missing_error(owner: &str, missing: &[&str]) -> WireguardError {
    let list = match missing {
        [] => String::new(),
        [one] => (*one).to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    };
    let verb = if missing.len() == 1 { "is" } else { "are" };
    WireguardError::invalid(format!(
        "Invalid configuration file! {owner}'s {list} {verb} missing."
    ))
}

fn parse_address(owner: &str, value: &str) -> Result<Ipv4Network, WireguardError> {
    value
        .split(',')
        .find_map(|a| a.trim().parse::<Ipv4Network>().ok())
        .ok_or_else(|| {
            WireguardError::invalid(format!(
                "Invalid configuration file! {owner}'s address '{value}' is not a valid IPv4 interface."
            ))
        })
}

fn split_commands(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

pub fn parse_interface_conf(text: &str) -> Result<ImportedInterface, WireguardError> {
    let mut private_key = None;
    let mut address = None;
    let mut listen_port = None;
    let mut on_up = Vec::new();
    let mut on_down = Vec::new();

    for (section, key, value) in entries(text)? {
        if section != Section::Interface {
            continue;
        }
        match key.as_str() {
            "privatekey" => private_key = Some(value),
            "address" => address = Some(parse_address("Interface", &value)?),
            "listenport" => {
                let port = value.parse::<u16>().map_err(|_| {
                    WireguardError::invalid(format!(
                        "Invalid configuration file! Interface's listen port '{value}' is not a valid port."
                    ))
                })?;
                listen_port = Some(port);
            }
            "postup" => on_up.extend(split_commands(&value)),
            "postdown" => on_down.extend(split_commands(&value)),
            _ => {}
        }
    }

    let gw_iface = on_up
        .iter()
        .find_map(|cmd| GATEWAY_REGEX.captures(cmd))
        .map(|c| c[1].to_string());

    let mut missing = Vec::new();
    if private_key.is_none() {
        missing.push("private key");
    }
    if address.is_none() {
        missing.push("address");
    }
    if listen_port.is_none() {
        missing.push("listen port");
    }
    if gw_iface.is_none() {
        missing.push("gateway");
    }
    match (private_key, address, listen_port, gw_iface) {
        (Some(private_key), Some(ipv4_address), Some(listen_port), Some(gw_iface)) => {
            Ok(ImportedInterface {
                private_key,
                ipv4_address,
                listen_port,
                on_up,
                on_down,
                gw_iface,
            })
        }
        _ => Err(missing_error("Interface", &missing)),
    }
}

pub fn parse_peer_conf(text: &str) -> Result<ImportedPeer, WireguardError> {
    let mut private_key = None;
    let mut address = None;
    let mut dns: Vec<Ipv4Addr> = Vec::new();
    let mut nat = false;

    for (section, key, value) in entries(text)? {
        match (section, key.as_str()) {
            (Section::Interface, "privatekey") => private_key = Some(value),
            (Section::Interface, "address") => address = Some(parse_address("Peer", &value)?),
            (Section::Interface, "dns") => {
                for server in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let ip = server.parse().map_err(|_| {
                        WireguardError::invalid(format!(
                            "Invalid configuration file! Peer's DNS server '{server}' is not a valid IPv4 address."
                        ))
                    })?;
                    dns.push(ip);
                }
            }
            (Section::Peer, "persistentkeepalive") => nat = true,
            _ => {}
        }
    }

    let mut missing = Vec::new();
    if private_key.is_none() {
        missing.push("private key");
    }
    if address.is_none() {
        missing.push("address");
    }
    if dns.is_empty() {
        missing.push("DNS");
    }
    match (private_key, address, dns.first()) {
        (Some(private_key), Some(ipv4_address), Some(&dns1)) => Ok(ImportedPeer {
            private_key,
            ipv4_address,
            dns1,
            dns2: dns.get(1).copied(),
            nat,
        }),
        _ => Err(missing_error("Peer", &missing)),
    }
}
