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

//! Queries about the host's own network devices.

use std::net::Ipv4Addr;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::shell::Shell;

/// One entry of `ip -json address`.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemDevice {
    pub ifname: String,
    #[serde(default)]
    pub addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddrInfo {
    pub family: String,
    pub local: String,
    #[serde(default)]
    pub prefixlen: u8,
}

pub fn parse_ip_json(output: &str) -> Vec<SystemDevice> {
    match serde_json::from_str(output) {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "unable to parse device list");
            Vec::new()
        }
    }
}

pub async fn system_devices<S: Shell>(shell: &S) -> Vec<SystemDevice> {
    match shell.run("ip -json address", false).await {
        Ok(result) if result.successful() => parse_ip_json(&result.output),
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "unable to list system devices");
            Vec::new()
        }
    }
}

pub async fn device_exists<S: Shell>(shell: &S, name: &str) -> bool {
    system_devices(shell).await.iter().any(|d| d.ifname == name)
}

/// Device that carries the default route, or an empty string if unknown.
pub async fn default_gateway<S: Shell>(shell: &S) -> String {
    match shell
        .run("ip route | head -1 | xargs | cut -d ' ' -f 5", false)
        .await
    {
        Ok(result) if result.successful() => {
            debug!(gateway = %result.output, "found default gateway");
            result.output
        }
        Ok(_) => String::new(),
        Err(e) => {
            warn!(error = %e, "unable to query default gateway");
            String::new()
        }
    }
}

pub async fn device_ipv4<S: Shell>(shell: &S, name: &str) -> Option<Ipv4Addr> {
    system_devices(shell)
        .await
        .into_iter()
        .find(|d| d.ifname == name)?
        .addr_info
        .into_iter()
        .filter(|a| a.family == "inet")
        .find_map(|a| a.local.parse().ok())
}

/// Absolute path of a binary as reported by `whereis`.
pub async fn which<S: Shell>(shell: &S, binary: &str) -> Option<String> {
    let result = shell
        .run(&format!("whereis {binary} | tr ' ' '\\n' | grep bin"), false)
        .await
        .ok()?;
    if !result.successful() {
        return None;
    }
    result.output.lines().next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_JSON: &str = r#"[
        {"ifindex":1,"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
        {"ifindex":2,"ifname":"eth0","addr_info":[
            {"family":"inet6","local":"fe80::1","prefixlen":64},
            {"family":"inet","local":"192.168.1.10","prefixlen":24}
        ]},
        {"ifindex":3,"ifname":"wg0"}
    ]"#;

    #[test]
    fn parses_device_list() {
        let devices = parse_ip_json(IP_JSON);
        let names: Vec<&str> = devices.iter().map(|d| d.ifname.as_str()).collect();
        assert_eq!(names, ["lo", "eth0", "wg0"]);
        assert_eq!(devices[1].addr_info[1].local, "192.168.1.10");
        assert_eq!(devices[1].addr_info[1].prefixlen, 24);
        assert!(devices[2].addr_info.is_empty());
    }

    #[test]
    fn garbage_yields_no_devices() {
        assert!(parse_ip_json("not json").is_empty());
    }
}
