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

//! wirekeep-core: WireGuard interface and peer lifecycle engine.
//!
//! The [`manager::WireguardManager`] owns the interface registry and is the
//! entry point for every mutation. Runtime actions go through a [`shell::Shell`]
//! which runs `wg`, `wg-quick`, `ip` and `iptables` on the host.

pub mod conf;
pub mod config;
pub mod cron;
pub mod error;
pub mod interface;
pub mod keys;
pub mod manager;
pub mod network;
pub mod peer;
pub mod registry;
pub mod shell;
pub mod traffic;

pub use error::WireguardError;
pub use interface::Interface;
pub use manager::{InterfaceRef, WireguardManager};
pub use peer::Peer;
pub use registry::{Interfaces, NamedMap};
pub use shell::{CommandResult, Host, Shell, SystemShell};
