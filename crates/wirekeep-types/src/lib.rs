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

//! wirekeep-types: Shared value types for the wirekeep ecosystem.
//!
//! This crate contains the traffic counters, status values and edit requests
//! exchanged between the core engine and whatever front end drives it.

#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::AddAssign;

use chrono::{DateTime, NaiveDateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Byte counters of one device (interface or peer).
///
/// Counters are expressed from the device's own point of view: for a peer,
/// `rx` is what the peer downloaded through the tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficData {
    /// Bytes received.
    pub rx: u64,
    /// Bytes transmitted.
    pub tx: u64,
    /// Most recent handshake, only known for live peer counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handshake: Option<DateTime<Utc>>,
}

impl TrafficData {
    /// Counters without handshake information.
    pub fn new(rx: u64, tx: u64) -> Self {
        Self {
            rx,
            tx,
            last_handshake: None,
        }
    }
}

impl AddAssign for TrafficData {
    fn add_assign(&mut self, other: Self) {
        self.rx = self.rx.saturating_add(other.rx);
        self.tx = self.tx.saturating_add(other.tx);
    }
}

/// Counters of every device at one instant, keyed by device uuid.
pub type TrafficSnapshot = HashMap<Uuid, TrafficData>;

/// Snapshots ordered by the local time they were taken at.
pub type TrafficHistory = BTreeMap<NaiveDateTime, TrafficSnapshot>;

/// Runtime state of a WireGuard interface as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceStatus {
    /// The kernel device exists.
    Up,
    /// The kernel device does not exist.
    Down,
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Already-parsed values for editing an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEdit {
    /// New interface name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Address of the interface inside its network, e.g. `10.0.0.1/24`.
    pub ipv4_address: Ipv4Network,
    /// UDP listen port.
    pub listen_port: u16,
    /// Host device used for NAT.
    pub gw_iface: String,
    /// Whether to bring the interface up on startup.
    pub auto: bool,
    /// Commands run after the interface comes up. Empty means "derive the defaults".
    pub on_up: Vec<String>,
    /// Commands run after the interface goes down. Empty means "derive the defaults".
    pub on_down: Vec<String>,
}

/// Already-parsed values for editing a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEdit {
    /// New peer name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Peer address, which must lie inside the target interface's network.
    pub ipv4_address: Ipv4Network,
    /// Interface that will own the peer afterwards.
    pub interface: Uuid,
    /// Primary DNS server.
    pub dns1: Ipv4Addr,
    /// Secondary DNS server.
    pub dns2: Option<Ipv4Addr>,
    /// Whether the peer sits behind NAT and needs keepalives.
    pub nat: bool,
}
